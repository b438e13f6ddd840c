use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use super::TriggerQueue;
use crate::job::{Cursor, JobId, SequenceId, Trigger};

/// In-process trigger stream for the single-process `local` backend and
/// for tests. Ids are allocated the same way a stream server does it:
/// wall-clock millis plus a counter, never going backwards.
#[derive(Default)]
pub struct MemoryQueue {
    entries: Mutex<Vec<Trigger>>,
    appended: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.entries()?.is_empty())
    }

    /// Snapshot of every trigger appended so far.
    pub fn snapshot(&self) -> Result<Vec<Trigger>> {
        Ok(self.entries()?.clone())
    }

    fn entries(&self) -> Result<MutexGuard<'_, Vec<Trigger>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("queue lock poisoned"))
    }

    fn last_id(&self) -> Result<SequenceId> {
        Ok(self
            .entries()?
            .last()
            .map(|t| t.sequence_id)
            .unwrap_or(SequenceId::ZERO))
    }

    fn after(&self, after: SequenceId) -> Result<Vec<Trigger>> {
        let entries = self.entries()?;
        // ids are sorted, so everything past the first match qualifies
        let start = entries.partition_point(|t| t.sequence_id <= after);
        Ok(entries[start..].to_vec())
    }
}

#[async_trait]
impl TriggerQueue for MemoryQueue {
    async fn append(&self, job_id: &JobId) -> Result<SequenceId> {
        let id = {
            let mut entries = self.entries()?;
            let last = entries
                .last()
                .map(|t| t.sequence_id)
                .unwrap_or(SequenceId::ZERO);
            let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
            let id = last.successor(now_ms);
            entries.push(Trigger {
                sequence_id: id,
                job_id: job_id.to_string(),
            });
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read(&self, cursor: &Cursor) -> Result<Vec<Trigger>> {
        let after = match cursor {
            Cursor::Tail => self.last_id()?,
            Cursor::After(id) => *id,
        };
        loop {
            // Register interest before looking, so an append between the
            // check and the await still wakes us.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.after(after)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn append_assigns_increasing_ids() {
        let queue = MemoryQueue::new();
        let a = queue.append(&JobId::new()).await.unwrap();
        let b = queue.append(&JobId::new()).await.unwrap();
        let c = queue.append(&JobId::new()).await.unwrap();
        assert!(a < b && b < c);
        assert_eq!(queue.len().unwrap(), 3);
    }

    #[tokio::test]
    async fn read_after_cursor_skips_seen_entries() {
        let queue = MemoryQueue::new();
        let first = queue.append(&JobId::new()).await.unwrap();
        let second_job = JobId::new();
        queue.append(&second_job).await.unwrap();

        let batch = queue.read(&Cursor::After(first)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].job_id, second_job.to_string());
    }

    #[tokio::test]
    async fn read_from_start_returns_everything_in_order() {
        let queue = MemoryQueue::new();
        let jobs: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();
        for job in &jobs {
            queue.append(job).await.unwrap();
        }
        let batch = queue.read(&Cursor::start()).await.unwrap();
        let got: Vec<String> = batch.into_iter().map(|t| t.job_id).collect();
        let want: Vec<String> = jobs.iter().map(|j| j.to_string()).collect();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn tail_ignores_existing_entries_and_wakes_on_append() {
        let queue = Arc::new(MemoryQueue::new());
        queue.append(&JobId::new()).await.unwrap();

        let reader = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.read(&Cursor::Tail).await })
        };

        // Reader must still be blocked: the only entry predates it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        let fresh = JobId::new();
        queue.append(&fresh).await.unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].job_id, fresh.to_string());
    }
}
