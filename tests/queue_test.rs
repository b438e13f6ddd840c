use std::sync::Arc;
use std::time::Duration;

use scribe::job::{Cursor, JobId};
use scribe::queue::TriggerQueue;
use scribe::queue::memory::MemoryQueue;

#[tokio::test]
async fn cursor_walk_sees_every_trigger_once() {
    let queue = MemoryQueue::new();
    let jobs: Vec<JobId> = (0..4).map(|_| JobId::new()).collect();
    for job in &jobs[..2] {
        queue.append(job).await.unwrap();
    }

    let mut cursor = Cursor::start();
    let mut seen = Vec::new();

    let batch = queue.read(&cursor).await.unwrap();
    for trigger in batch {
        cursor = Cursor::After(trigger.sequence_id);
        seen.push(trigger.job_id);
    }

    for job in &jobs[2..] {
        queue.append(job).await.unwrap();
    }
    let batch = queue.read(&cursor).await.unwrap();
    for trigger in batch {
        seen.push(trigger.job_id);
    }

    let want: Vec<String> = jobs.iter().map(|j| j.to_string()).collect();
    assert_eq!(seen, want);
}

#[tokio::test]
async fn blocked_reader_wakes_for_concurrent_producers() {
    let queue = Arc::new(MemoryQueue::new());
    let start = Cursor::start();

    let reader = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.read(&start).await })
    };

    let producers: Vec<_> = (0..3)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.append(&JobId::new()).await })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap().unwrap();
    }

    let batch = tokio::time::timeout(Duration::from_secs(2), reader)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!batch.is_empty());

    let all = queue.snapshot().unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].sequence_id < w[1].sequence_id));
}
