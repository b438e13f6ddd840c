use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use super::{PayloadEntry, PayloadStore, ResultStore};
use crate::job::{JobId, JobResult};

/// SQLite-backed payload and result tables.
///
/// One file serves both traits; use `":memory:"` for an ephemeral store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS payloads (
                job_id     TEXT PRIMARY KEY,
                payload    TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS payloads_created_at ON payloads (created_at);
            CREATE TABLE IF NOT EXISTS results (
                job_id      TEXT PRIMARY KEY,
                text        TEXT NOT NULL,
                produced_at INTEGER NOT NULL
            );",
        )
        .context("failed to create tables")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {ms}"))
}

#[async_trait]
impl PayloadStore for SqliteStore {
    async fn put(&self, job_id: &JobId, payload: &Value) -> Result<()> {
        let json = serde_json::to_string(payload)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO payloads (job_id, payload, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET payload = excluded.payload",
            params![job_id.to_string(), json, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    async fn fetch_raw(&self, job_id: &JobId) -> Result<Option<String>> {
        let conn = self.conn()?;
        let json = conn
            .query_row(
                "SELECT payload FROM payloads WHERE job_id = ?1",
                [job_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json)
    }

    async fn purge(&self, job_id: &JobId) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM payloads WHERE job_id = ?1",
            [job_id.to_string()],
        )?;
        Ok(removed > 0)
    }

    async fn created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PayloadEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT job_id, created_at FROM payloads
             WHERE created_at < ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([cutoff.timestamp_millis()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, created_at)| -> Result<PayloadEntry> {
                Ok(PayloadEntry {
                    job_id: id.parse().with_context(|| format!("bad job id in payloads: {id}"))?,
                    created_at: from_millis(created_at)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn upsert(&self, result: &JobResult) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO results (job_id, text, produced_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET
                text = excluded.text,
                produced_at = excluded.produced_at",
            params![
                result.job_id.to_string(),
                result.text,
                result.produced_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    async fn lookup(&self, job_id: &JobId) -> Result<Option<JobResult>> {
        let conn = self.conn()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT text, produced_at FROM results WHERE job_id = ?1",
                [job_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((text, produced_at)) => Ok(Some(JobResult {
                job_id: *job_id,
                text,
                produced_at: from_millis(produced_at)?,
            })),
            None => Ok(None),
        }
    }
}
