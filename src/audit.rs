//! Finding payloads that never made it through.
//!
//! A payload lingers when its trigger was never appended, when the
//! consumer skipped it, or when delivery failed. Of those, the ones
//! without any result are the jobs nobody has answered.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::store::{PayloadEntry, PayloadStore, ResultStore};

/// Payload entries older than `older_than` that have no result, oldest first.
pub async fn find_orphans(
    payloads: &dyn PayloadStore,
    results: &dyn ResultStore,
    older_than: Duration,
) -> Result<Vec<PayloadEntry>> {
    let age = chrono::Duration::from_std(older_than).context("audit age out of range")?;
    let cutoff = Utc::now() - age;

    let mut orphans = Vec::new();
    for entry in payloads.created_before(cutoff).await? {
        if results.lookup(&entry.job_id).await?.is_none() {
            orphans.push(entry);
        }
    }
    tracing::debug!(%cutoff, count = orphans.len(), "orphan audit finished");
    Ok(orphans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::job::{JobId, JobResult};
    use crate::store::sqlite::SqliteStore;

    #[tokio::test]
    async fn payloads_with_results_are_not_orphans() {
        let store = SqliteStore::in_memory().unwrap();
        let answered = JobId::new();
        let forgotten = JobId::new();
        store.put(&answered, &json!({})).await.unwrap();
        store.put(&forgotten, &json!({})).await.unwrap();
        store
            .upsert(&JobResult {
                job_id: answered,
                text: "delivery failed but result exists".to_string(),
                produced_at: Utc::now(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let orphans = find_orphans(&store, &store, Duration::ZERO).await.unwrap();
        let ids: Vec<JobId> = orphans.into_iter().map(|e| e.job_id).collect();
        assert_eq!(ids, vec![forgotten]);
    }

    #[tokio::test]
    async fn young_payloads_are_left_alone() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(&JobId::new(), &json!({})).await.unwrap();

        let orphans = find_orphans(&store, &store, Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(orphans.is_empty());
    }
}
