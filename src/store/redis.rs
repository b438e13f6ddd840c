use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde_json::Value;

use super::{PayloadEntry, PayloadStore};
use crate::job::JobId;

/// Payloads as plain string keys, `<prefix><job_id>`, plus a sorted-set
/// index `<prefix>index` scored by creation time so the audit can find
/// old entries without scanning the keyspace.
pub struct RedisPayloadStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisPayloadStore {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("failed to connect to redis")?;
        Ok(Self::new(conn, prefix))
    }

    pub fn new(conn: MultiplexedConnection, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    fn key(&self, job_id: &JobId) -> String {
        format!("{}{}", self.prefix, job_id)
    }

    fn index_key(&self) -> String {
        format!("{}index", self.prefix)
    }
}

#[async_trait]
impl PayloadStore for RedisPayloadStore {
    async fn put(&self, job_id: &JobId, payload: &Value) -> Result<()> {
        let json = serde_json::to_string(payload)?;
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .set(self.key(job_id), json)
            .ignore()
            .zadd(
                self.index_key(),
                job_id.to_string(),
                Utc::now().timestamp_millis(),
            )
            .ignore()
            .query_async(&mut conn)
            .await
            .context("redis SET failed")?;
        Ok(())
    }

    async fn fetch_raw(&self, job_id: &JobId) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn
            .get(self.key(job_id))
            .await
            .context("redis GET failed")?;
        Ok(json)
    }

    async fn purge(&self, job_id: &JobId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(self.key(job_id))
            .zrem(self.index_key(), job_id.to_string())
            .query_async(&mut conn)
            .await
            .context("redis DEL failed")?;
        Ok(removed > 0)
    }

    async fn created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PayloadEntry>> {
        let mut conn = self.conn.clone();
        let max = format!("({}", cutoff.timestamp_millis());
        let rows: Vec<(String, f64)> = conn
            .zrangebyscore_withscores(self.index_key(), "-inf", max)
            .await
            .context("redis ZRANGEBYSCORE failed")?;
        rows.into_iter()
            .map(|(id, score)| entry_from_index(&id, score))
            .collect()
    }
}

fn entry_from_index(id: &str, score: f64) -> Result<PayloadEntry> {
    let created_at = DateTime::from_timestamp_millis(score as i64)
        .ok_or_else(|| anyhow!("bad index score for {id}: {score}"))?;
    Ok(PayloadEntry {
        job_id: id
            .parse()
            .with_context(|| format!("bad job id in payload index: {id}"))?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_entry_decodes_millis_score() {
        let id = JobId::new();
        let entry = entry_from_index(&id.to_string(), 1_700_000_000_123.0).unwrap();
        assert_eq!(entry.job_id, id);
        assert_eq!(entry.created_at.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn index_entry_rejects_bad_id() {
        assert!(entry_from_index("nope", 1.0).is_err());
    }
}
