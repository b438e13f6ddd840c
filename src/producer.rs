use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::events::{Event, EventBus};
use crate::job::JobId;
use crate::queue::TriggerQueue;
use crate::store::PayloadStore;

/// Accepts submissions: store the payload, then append its trigger.
///
/// The payload is written first so the consumer never sees a trigger
/// for a job that was not stored yet. If the append fails after that,
/// the payload is orphaned until the audit finds it.
pub struct Producer {
    payloads: Arc<dyn PayloadStore>,
    queue: Arc<dyn TriggerQueue>,
    events: Arc<EventBus>,
}

impl Producer {
    pub fn new(
        payloads: Arc<dyn PayloadStore>,
        queue: Arc<dyn TriggerQueue>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            payloads,
            queue,
            events,
        }
    }

    /// Returns as soon as the trigger is queued. The payload is not validated.
    pub async fn submit(&self, payload: Value) -> Result<JobId> {
        let job_id = JobId::new();

        self.payloads
            .put(&job_id, &payload)
            .await
            .with_context(|| format!("failed to store payload for job {job_id}"))?;

        let sequence_id = match self.queue.append(&job_id).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    %job_id,
                    error = %format!("{e:#}"),
                    "trigger append failed; payload stored but orphaned"
                );
                return Err(e).with_context(|| format!("failed to enqueue job {job_id}"));
            }
        };

        tracing::info!(%job_id, %sequence_id, "job submitted");
        self.events.emit(Event::JobSubmitted {
            job_id,
            sequence_id,
        });
        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::job::{Cursor, SequenceId, Trigger};
    use crate::queue::memory::MemoryQueue;
    use crate::store::sqlite::SqliteStore;

    struct BrokenQueue;

    #[async_trait]
    impl TriggerQueue for BrokenQueue {
        async fn append(&self, _job_id: &JobId) -> Result<SequenceId> {
            bail!("connection refused")
        }

        async fn read(&self, _cursor: &Cursor) -> Result<Vec<Trigger>> {
            bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn submit_stores_payload_then_appends_trigger() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let queue = Arc::new(MemoryQueue::new());
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let producer = Producer::new(store.clone(), queue.clone(), events);

        let payload = json!({"text": "hello", "imageRefs": [], "metadata": {"postId": "p1"}});
        let job_id = producer.submit(payload.clone()).await.unwrap();

        assert_eq!(store.fetch(&job_id).await.unwrap(), Some(payload));
        let triggers = queue.snapshot().unwrap();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].job_id, job_id.to_string());
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::JobSubmitted { job_id: id, .. } if id == job_id
        ));
    }

    #[tokio::test]
    async fn malformed_payload_is_accepted() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let queue = Arc::new(MemoryQueue::new());
        let producer = Producer::new(store.clone(), queue.clone(), Arc::default());

        let job_id = producer.submit(json!("just a string")).await.unwrap();
        assert_eq!(
            store.fetch(&job_id).await.unwrap(),
            Some(json!("just a string"))
        );
    }

    #[tokio::test]
    async fn failed_append_leaves_orphaned_payload() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let producer = Producer::new(store.clone(), Arc::new(BrokenQueue), Arc::default());

        let err = producer.submit(json!({"text": "x"})).await.unwrap_err();
        assert!(format!("{err:#}").contains("connection refused"));

        let orphans = store
            .created_before(chrono::Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(orphans.len(), 1);
    }
}
