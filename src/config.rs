//! Runtime settings, from flags or the environment (`.env` included).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};

use crate::consts::{
    DEFAULT_IMAGE_MEDIA_TYPE, DEFAULT_PAYLOAD_PREFIX, DEFAULT_STREAM_KEY, default_db_path,
};
use crate::consumer::{ConsumerConfig, MissingPayloadPolicy};
use crate::job::Cursor;
use crate::sink::{BoundedRetry, NoRetry, RetryPolicy};
use crate::telemetry::LogFormat;

/// Where payloads and triggers live. Results always go to SQLite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// SQLite payloads and an in-process queue; API and worker must share a process.
    Local,
    /// Redis string keys and a Redis stream.
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Gemini,
    Anthropic,
}

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Address the HTTP API binds to
    #[arg(long, env = "SCRIBE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port the HTTP API listens on
    #[arg(long, env = "PORT", default_value_t = 3002)]
    pub port: u16,

    #[arg(long, env = "SCRIBE_BACKEND", value_enum, default_value_t = Backend::Local)]
    pub backend: Backend,

    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Stream the triggers are appended to
    #[arg(long, env = "SCRIBE_STREAM_KEY", default_value = DEFAULT_STREAM_KEY)]
    pub stream_key: String,

    /// Key prefix for stored payloads
    #[arg(long, env = "SCRIBE_PAYLOAD_PREFIX", default_value = DEFAULT_PAYLOAD_PREFIX)]
    pub payload_prefix: String,

    /// SQLite database path (use :memory: for ephemeral) [default: ~/.scribe/scribe.db]
    #[arg(long, env = "SCRIBE_DB")]
    pub db: Option<String>,

    #[arg(long, env = "SCRIBE_PROVIDER", value_enum, default_value_t = Provider::Gemini)]
    pub provider: Provider,

    /// Model name (provider-specific)
    #[arg(long, env = "SCRIBE_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Base URL of the service receiving results at /ai-callback
    #[arg(long, env = "MAIN_SERVICE_URL", default_value = "http://localhost:3000")]
    pub callback_url: String,

    /// Media type attached to fetched images
    #[arg(long, env = "SCRIBE_IMAGE_MEDIA_TYPE", default_value = DEFAULT_IMAGE_MEDIA_TYPE)]
    pub image_media_type: String,

    /// Timeout for each image download and callback, in seconds
    #[arg(long, env = "SCRIBE_FETCH_TIMEOUT")]
    pub fetch_timeout_secs: Option<u64>,

    /// Timeout for each generation call, in seconds
    #[arg(long, env = "SCRIBE_GENERATION_TIMEOUT")]
    pub generation_timeout_secs: Option<u64>,

    /// Extra delivery attempts after a failed callback
    #[arg(long, env = "SCRIBE_DELIVERY_RETRIES", default_value_t = 0)]
    pub delivery_retries: u32,

    /// Delay before the first delivery retry, in milliseconds (doubles each time)
    #[arg(long, env = "SCRIBE_DELIVERY_RETRY_DELAY_MS", default_value_t = 500)]
    pub delivery_retry_delay_ms: u64,

    #[arg(long, env = "SCRIBE_MISSING_PAYLOAD", value_enum, default_value_t = MissingPayloadPolicy::Skip)]
    pub missing_payload: MissingPayloadPolicy,

    /// Process triggers already in the queue instead of only new ones
    #[arg(long, env = "SCRIBE_REPLAY_FROM_START", default_value_t = false)]
    pub replay_from_start: bool,

    #[arg(long, env = "SCRIBE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// HTTP request timeout, in seconds
    #[arg(long, env = "SCRIBE_REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl Settings {
    pub fn addr(&self) -> Result<SocketAddr> {
        let ip = self
            .host
            .parse()
            .with_context(|| format!("invalid host address: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn db_path(&self) -> Result<String> {
        match &self.db {
            Some(db) => Ok(db.clone()),
            None => Ok(default_db_path()?.to_string_lossy().into_owned()),
        }
    }

    /// Key for the selected provider; empty keys count as missing.
    pub fn api_key(&self) -> Result<String> {
        let (key, var) = match self.provider {
            Provider::Gemini => (&self.gemini_api_key, "GEMINI_API_KEY"),
            Provider::Anthropic => (&self.anthropic_api_key, "ANTHROPIC_API_KEY"),
        };
        match key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key.to_string()),
            _ => bail!("no API key: set {var}"),
        }
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }

    pub fn generation_timeout(&self) -> Option<Duration> {
        self.generation_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        if self.delivery_retries == 0 {
            Arc::new(NoRetry)
        } else {
            Arc::new(BoundedRetry::new(
                self.delivery_retries,
                Duration::from_millis(self.delivery_retry_delay_ms),
            ))
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            start: if self.replay_from_start {
                Cursor::start()
            } else {
                Cursor::Tail
            },
            missing_payload: self.missing_payload,
            ..ConsumerConfig::default()
        }
    }
}
