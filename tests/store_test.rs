use chrono::Utc;
use serde_json::json;

use scribe::job::{JobId, JobResult};
use scribe::store::sqlite::SqliteStore;
use scribe::store::{PayloadStore, ResultStore};

#[tokio::test]
async fn payloads_and_results_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scribe.db");
    let path = path.to_str().unwrap();

    let job_id = JobId::new();
    {
        let store = SqliteStore::open(path).unwrap();
        store
            .put(&job_id, &json!({"text": "persist me"}))
            .await
            .unwrap();
        store
            .upsert(&JobResult {
                job_id,
                text: "done".to_string(),
                produced_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let store = SqliteStore::open(path).unwrap();
    assert_eq!(
        store.fetch(&job_id).await.unwrap(),
        Some(json!({"text": "persist me"}))
    );
    assert_eq!(store.lookup(&job_id).await.unwrap().unwrap().text, "done");
}

#[tokio::test]
async fn reopening_keeps_existing_tables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scribe.db");
    let path = path.to_str().unwrap();

    SqliteStore::open(path).unwrap();
    SqliteStore::open(path).unwrap();
}

#[tokio::test]
async fn result_timestamp_keeps_millisecond_precision() {
    let store = SqliteStore::in_memory().unwrap();
    let job_id = JobId::new();
    let produced_at = chrono::DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();

    store
        .upsert(&JobResult {
            job_id,
            text: "t".to_string(),
            produced_at,
        })
        .await
        .unwrap();

    let stored = store.lookup(&job_id).await.unwrap().unwrap();
    assert_eq!(stored.produced_at, produced_at);
    assert_eq!(stored.job_id, job_id);
}

#[tokio::test]
async fn purged_payload_leaves_result_alone() {
    let store = SqliteStore::in_memory().unwrap();
    let job_id = JobId::new();
    store.put(&job_id, &json!({})).await.unwrap();
    store
        .upsert(&JobResult {
            job_id,
            text: "kept".to_string(),
            produced_at: Utc::now(),
        })
        .await
        .unwrap();

    assert!(store.purge(&job_id).await.unwrap());
    assert!(store.fetch(&job_id).await.unwrap().is_none());
    assert_eq!(store.lookup(&job_id).await.unwrap().unwrap().text, "kept");
}
