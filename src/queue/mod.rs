pub mod memory;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;

use crate::job::{Cursor, JobId, SequenceId, Trigger};

/// Append-only stream of triggers with caller-held read positions.
///
/// Entries are never removed by reading; the consumer tracks where it is
/// with a [`Cursor`].
#[async_trait]
pub trait TriggerQueue: Send + Sync {
    /// Append a trigger for `job_id` and return the id assigned to it.
    async fn append(&self, job_id: &JobId) -> Result<SequenceId>;

    /// Block until at least one trigger after `cursor` exists, then return
    /// them in append order. An `Err` is a transport problem, not a job
    /// problem; callers retry.
    async fn read(&self, cursor: &Cursor) -> Result<Vec<Trigger>>;
}
