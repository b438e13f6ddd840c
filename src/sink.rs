//! Where results go: the result store first, then the downstream callback.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consts::CALLBACK_PATH;
use crate::job::{JobId, JobResult};
use crate::store::{PayloadStore, ResultStore};

/// Body of the outbound callback. `metadata` is the submitter's, verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub result_text: String,
    pub metadata: Value,
}

/// The downstream service that receives finished results.
#[async_trait]
pub trait Callback: Send + Sync {
    async fn deliver(&self, delivery: &Delivery) -> Result<()>;
}

/// POSTs each delivery as JSON to `{base}/ai-callback`.
pub struct HttpCallback {
    client: reqwest::Client,
    url: String,
}

impl HttpCallback {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build().context("failed to build HTTP client")?,
            url: format!("{}{}", base_url.trim_end_matches('/'), CALLBACK_PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Callback for HttpCallback {
    async fn deliver(&self, delivery: &Delivery) -> Result<()> {
        self.client
            .post(&self.url)
            .json(delivery)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?
            .error_for_status()
            .with_context(|| format!("POST {} was rejected", self.url))?;
        Ok(())
    }
}

// --- Retry ---

/// Decides whether a failed delivery is attempted again.
pub trait RetryPolicy: Send + Sync {
    /// `failures` counts failed attempts so far (starting at 1). `None` gives up.
    fn delay_after(&self, failures: u32) -> Option<Duration>;
}

/// One attempt, no retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn delay_after(&self, _failures: u32) -> Option<Duration> {
        None
    }
}

/// Up to `max_retries` extra attempts with exponential backoff from `base_delay`.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRetry {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BoundedRetry {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy for BoundedRetry {
    fn delay_after(&self, failures: u32) -> Option<Duration> {
        if failures == 0 || failures > self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(failures - 1);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

// --- Sink ---

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Callback accepted; the payload was purged (or purge was attempted).
    Delivered { attempts: u32 },
    /// Every permitted attempt failed; the payload is retained.
    Failed { attempts: u32, error: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

pub struct ResultSink {
    results: Arc<dyn ResultStore>,
    payloads: Arc<dyn PayloadStore>,
    callback: Arc<dyn Callback>,
    retry: Arc<dyn RetryPolicy>,
}

impl ResultSink {
    pub fn new(
        results: Arc<dyn ResultStore>,
        payloads: Arc<dyn PayloadStore>,
        callback: Arc<dyn Callback>,
    ) -> Self {
        Self {
            results,
            payloads,
            callback,
            retry: Arc::new(NoRetry),
        }
    }

    pub fn with_retry(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    /// Upserts the result, stamped now.
    pub async fn persist(&self, job_id: &JobId, text: &str) -> Result<JobResult> {
        let result = JobResult {
            job_id: *job_id,
            text: text.to_string(),
            produced_at: Utc::now(),
        };
        self.results
            .upsert(&result)
            .await
            .with_context(|| format!("failed to persist result for job {job_id}"))?;
        tracing::info!(%job_id, "result persisted");
        Ok(result)
    }

    /// Pushes the result downstream. The payload is purged only once the
    /// callback has accepted it; on failure it stays for the audit.
    pub async fn deliver(&self, job_id: &JobId, text: &str, metadata: &Value) -> DeliveryOutcome {
        let delivery = Delivery {
            result_text: text.to_string(),
            metadata: metadata.clone(),
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.callback.deliver(&delivery).await {
                Ok(()) => break,
                Err(e) => {
                    let error = format!("{e:#}");
                    match self.retry.delay_after(attempts) {
                        Some(delay) => {
                            tracing::warn!(%job_id, attempts, %error, ?delay, "delivery failed, retrying");
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(%job_id, attempts, %error, "delivery failed, payload retained");
                            return DeliveryOutcome::Failed { attempts, error };
                        }
                    }
                }
            }
        }

        tracing::info!(%job_id, attempts, "result delivered");
        match self.payloads.purge(job_id).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(%job_id, "payload already gone"),
            Err(e) => {
                tracing::warn!(%job_id, error = %format!("{e:#}"), "failed to purge delivered payload")
            }
        }
        DeliveryOutcome::Delivered { attempts }
    }
}
