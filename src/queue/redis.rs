//! Trigger queue on a Redis stream.
//!
//! Producers `XADD <stream> * jobId <id>`; the consumer runs
//! `XREAD BLOCK 0 STREAMS <stream> <cursor>` on its own connection, since a
//! blocked read would stall every other command sharing the socket.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use tokio::sync::Mutex;

use super::TriggerQueue;
use crate::job::{Cursor, JobId, SequenceId, Trigger};

/// Field carrying the job id on each stream entry.
pub const JOB_ID_FIELD: &str = "jobId";

/// Older producers wrote the id under this name.
const LEGACY_JOB_ID_FIELD: &str = "dataId";

pub struct RedisTriggerQueue {
    client: redis::Client,
    writer: MultiplexedConnection,
    /// Dropped after a failed read so the next read reconnects.
    reader: Mutex<Option<MultiplexedConnection>>,
    stream: String,
}

impl RedisTriggerQueue {
    pub async fn connect(url: &str, stream: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let writer = client
            .get_multiplexed_async_connection()
            .await
            .context("failed to connect to redis")?;
        Ok(Self {
            client,
            writer,
            reader: Mutex::new(None),
            stream: stream.into(),
        })
    }

    async fn reader(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.reader.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("failed to open stream reader connection")?;
        *slot = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl TriggerQueue for RedisTriggerQueue {
    async fn append(&self, job_id: &JobId) -> Result<SequenceId> {
        let mut conn = self.writer.clone();
        let id: String = conn
            .xadd(&self.stream, "*", &[(JOB_ID_FIELD, job_id.to_string())])
            .await
            .context("XADD failed")?;
        id.parse()
            .with_context(|| format!("server returned bad stream id {id:?}"))
    }

    async fn read(&self, cursor: &Cursor) -> Result<Vec<Trigger>> {
        let from = match cursor {
            Cursor::Tail => "$".to_string(),
            Cursor::After(id) => id.to_string(),
        };
        let mut conn = self.reader().await?;
        let options = StreamReadOptions::default().block(0);
        let reply: redis::RedisResult<Option<StreamReadReply>> = conn
            .xread_options(&[&self.stream], &[&from], &options)
            .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                *self.reader.lock().await = None;
                return Err(e).context("XREAD failed");
            }
        };

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        reply
            .keys
            .iter()
            .filter(|key| key.key == self.stream)
            .flat_map(|key| key.ids.iter())
            .map(trigger_from_entry)
            .collect()
    }
}

/// An entry without a job id still becomes a trigger (with an empty id) so
/// the cursor moves past it.
fn trigger_from_entry(entry: &StreamId) -> Result<Trigger> {
    let sequence_id: SequenceId = entry
        .id
        .parse()
        .with_context(|| format!("bad stream entry id {:?}", entry.id))?;
    let job_id = entry
        .get::<String>(JOB_ID_FIELD)
        .or_else(|| entry.get::<String>(LEGACY_JOB_ID_FIELD))
        .unwrap_or_default();
    Ok(Trigger {
        sequence_id,
        job_id,
    })
}
