//! Project-wide constants.

use std::path::PathBuf;

use anyhow::{Context, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result text when a job has neither text nor any image that could be fetched.
pub const NO_USABLE_CONTENT: &str = "no usable content";

/// Result text when the generation call fails.
pub const GENERATION_FAILED: &str = "unable to generate response";

/// Result text when anything else goes wrong inside one job.
pub const INTERNAL_ERROR: &str = "internal error during processing";

/// Result text for a trigger whose payload is gone, under the placeholder policy.
pub const PAYLOAD_MISSING: &str = "payload missing";

/// Stream the producer appends triggers to.
pub const DEFAULT_STREAM_KEY: &str = "ai_trigger_queue";

/// Prefix for payload keys in a key-value backend.
pub const DEFAULT_PAYLOAD_PREFIX: &str = "data:";

/// Media type attached to every fetched image.
pub const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/jpeg";

/// Path appended to the callback base URL.
pub const CALLBACK_PATH: &str = "/ai-callback";

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

/// Default database path: `~/.scribe/scribe.db`.
/// Holds payloads (local backend) and results.
pub fn default_db_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("cannot determine home directory")?;
    Ok(home.join(".scribe").join("scribe.db"))
}
