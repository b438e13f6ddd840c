pub mod redis;
pub mod sqlite;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::job::{JobId, JobResult};

/// A payload still held by the store, as seen by the audit.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadEntry {
    pub job_id: JobId,
    pub created_at: DateTime<Utc>,
}

/// Large job payloads keyed by job id. Written by the producer, purged by
/// the result sink once the result has been delivered.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    async fn put(&self, job_id: &JobId, payload: &Value) -> Result<()>;
    /// The stored text exactly as written. `Err` means the store could not
    /// be reached; undecodable content is still `Ok`.
    async fn fetch_raw(&self, job_id: &JobId) -> Result<Option<String>>;

    async fn fetch(&self, job_id: &JobId) -> Result<Option<Value>> {
        match self.fetch_raw(job_id).await? {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw)
                    .with_context(|| format!("payload for job {job_id} is not valid JSON"))?,
            )),
            None => Ok(None),
        }
    }

    /// Returns whether an entry was removed.
    async fn purge(&self, job_id: &JobId) -> Result<bool>;
    /// Entries written strictly before `cutoff`, oldest first.
    async fn created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PayloadEntry>>;
}

/// Terminal results keyed by job id. Upserts overwrite.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn upsert(&self, result: &JobResult) -> Result<()>;
    async fn lookup(&self, job_id: &JobId) -> Result<Option<JobResult>>;
}
