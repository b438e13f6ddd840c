//! Wiring: settings in, running pipeline out.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;

use crate::api::{self, AppState};
use crate::config::{Backend, Provider, Settings};
use crate::consumer::Consumer;
use crate::dispatch::Dispatcher;
use crate::events::EventBus;
use crate::fetch::HttpImageSource;
use crate::generator::anthropic::AnthropicGenerator;
use crate::generator::gemini::GeminiGenerator;
use crate::generator::{Generator, WithTimeout};
use crate::producer::Producer;
use crate::queue::TriggerQueue;
use crate::queue::memory::MemoryQueue;
use crate::queue::redis::RedisTriggerQueue;
use crate::sink::{HttpCallback, ResultSink};
use crate::store::redis::RedisPayloadStore;
use crate::store::sqlite::SqliteStore;
use crate::store::{PayloadStore, ResultStore};

/// Which halves of the service this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Role {
    #[default]
    All,
    Api,
    Worker,
}

const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Backends {
    pub payloads: Arc<dyn PayloadStore>,
    pub results: Arc<dyn ResultStore>,
    pub queue: Arc<dyn TriggerQueue>,
}

impl Backends {
    pub async fn open(settings: &Settings) -> Result<Self> {
        let db_path = settings.db_path()?;
        if db_path != ":memory:" {
            if let Some(parent) = Path::new(&db_path).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let sqlite = Arc::new(SqliteStore::open(&db_path)?);
        tracing::info!(db = %db_path, backend = ?settings.backend, "opening backends");

        Ok(match settings.backend {
            Backend::Local => Self {
                payloads: sqlite.clone(),
                results: sqlite,
                queue: Arc::new(MemoryQueue::new()),
            },
            Backend::Redis => Self {
                payloads: Arc::new(
                    RedisPayloadStore::connect(&settings.redis_url, &settings.payload_prefix)
                        .await?,
                ),
                results: sqlite,
                queue: Arc::new(
                    RedisTriggerQueue::connect(&settings.redis_url, &settings.stream_key).await?,
                ),
            },
        })
    }
}

pub fn build_generator(settings: &Settings) -> Result<Arc<dyn Generator>> {
    let key = settings.api_key()?;
    let model = settings.model.clone();
    let generator: Box<dyn Generator> = match settings.provider {
        Provider::Gemini => Box::new(GeminiGenerator::new(key, model)),
        Provider::Anthropic => Box::new(AnthropicGenerator::new(key, model)),
    };
    Ok(match settings.generation_timeout() {
        Some(limit) => Arc::new(WithTimeout::new(generator, limit)),
        None => Arc::from(generator),
    })
}

pub fn build_consumer(
    settings: &Settings,
    backends: &Backends,
    events: Arc<EventBus>,
) -> Result<Consumer> {
    let images = Arc::new(HttpImageSource::new(settings.fetch_timeout())?);
    let dispatcher = Dispatcher::new(build_generator(settings)?, images)
        .with_media_type(&settings.image_media_type);

    let callback = Arc::new(HttpCallback::new(
        &settings.callback_url,
        settings.fetch_timeout(),
    )?);
    tracing::info!(url = %callback.url(), "delivering results");
    let sink = ResultSink::new(backends.results.clone(), backends.payloads.clone(), callback)
        .with_retry(settings.retry_policy());

    Ok(Consumer::new(
        backends.queue.clone(),
        backends.payloads.clone(),
        dispatcher,
        sink,
        events,
        settings.consumer_config(),
    ))
}

pub fn build_state(backends: &Backends, events: Arc<EventBus>) -> AppState {
    AppState {
        producer: Arc::new(Producer::new(
            backends.payloads.clone(),
            backends.queue.clone(),
            events,
        )),
        results: backends.results.clone(),
        payloads: backends.payloads.clone(),
    }
}

/// Runs the API and/or the worker until SIGINT/SIGTERM.
pub async fn serve(settings: &Settings, role: Role) -> Result<()> {
    if settings.backend == Backend::Local && role != Role::All {
        bail!("the local backend keeps its queue in memory; run with --role all or use --backend redis");
    }

    let backends = Backends::open(settings).await?;
    let events = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();

    let worker = if role == Role::Api {
        None
    } else {
        let consumer = build_consumer(settings, &backends, events.clone())?;
        let token = cancel.clone();
        Some(tokio::spawn(async move { consumer.run(token).await }))
    };

    if role == Role::Worker {
        shutdown_signal().await;
    } else {
        let addr = settings.addr()?;
        let app = api::router(build_state(&backends, events), settings.request_timeout());
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        tracing::info!(%addr, ?role, "listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;
    }

    cancel.cancel();
    if let Some(worker) = worker {
        match tokio::time::timeout(WORKER_STOP_TIMEOUT, worker).await {
            Ok(Ok(cursor)) => tracing::info!(?cursor, "worker stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "worker task failed"),
            Err(_) => tracing::warn!("worker did not stop in time"),
        }
    }
    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
