use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;

use scribe::app::{self, Backends, Role};
use scribe::audit;
use scribe::config::{Backend, Settings};
use scribe::events::EventBus;
use scribe::job::JobPayload;
use scribe::producer::Producer;
use scribe::telemetry;

#[derive(Parser)]
#[command(
    name = "scribe",
    version,
    about = "Queue posts and comments for AI annotation and deliver the results."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and/or the worker
    Serve {
        #[arg(long, value_enum, default_value_t = Role::All)]
        role: Role,
    },
    /// Enqueue one job directly (redis backend only)
    Submit {
        /// Prompt text
        #[arg(long, default_value = "")]
        text: String,

        /// Image URL (repeatable)
        #[arg(long = "image")]
        images: Vec<String>,

        /// Metadata echoed to the callback, as JSON
        #[arg(long, default_value = "{}")]
        metadata: String,
    },
    /// List stored payloads that never got a result
    Audit {
        /// Only report payloads at least this old
        #[arg(long, default_value_t = 300)]
        older_than_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init(cli.settings.log_format);

    match cli.command {
        Command::Serve { role } => app::serve(&cli.settings, role).await,
        Command::Submit {
            text,
            images,
            metadata,
        } => handle_submit(&cli.settings, text, images, &metadata).await,
        Command::Audit { older_than_secs } => {
            handle_audit(&cli.settings, Duration::from_secs(older_than_secs)).await
        }
    }
}

async fn handle_submit(
    settings: &Settings,
    text: String,
    images: Vec<String>,
    metadata: &str,
) -> anyhow::Result<()> {
    if settings.backend == Backend::Local {
        bail!("submit needs a shared queue: use --backend redis, or POST /store-job");
    }
    let metadata: Value = serde_json::from_str(metadata).context("--metadata is not JSON")?;

    let backends = Backends::open(settings).await?;
    let producer = Producer::new(backends.payloads, backends.queue, EventBus::default().into());
    let job_id = producer
        .submit(JobPayload::new(text, images, metadata).to_value())
        .await?;
    println!("{job_id}");
    Ok(())
}

async fn handle_audit(settings: &Settings, older_than: Duration) -> anyhow::Result<()> {
    let backends = Backends::open(settings).await?;
    let orphans = audit::find_orphans(
        backends.payloads.as_ref(),
        backends.results.as_ref(),
        older_than,
    )
    .await?;

    if orphans.is_empty() {
        println!("no orphaned payloads");
        return Ok(());
    }
    for entry in &orphans {
        println!("{}  {}", entry.job_id, entry.created_at.to_rfc3339());
    }
    println!("{} orphaned payload(s)", orphans.len());
    Ok(())
}
