//! Records that flow through the pipeline: jobs, triggers and results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Correlation key shared by the payload, its trigger and its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Queue-assigned position of a trigger, `<millis>-<seq>`.
///
/// Ordering is by milliseconds first, then by the per-millisecond counter,
/// which matches how stream entry ids compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceId {
    pub millis: u64,
    pub seq: u64,
}

impl SequenceId {
    /// Position before every real entry.
    pub const ZERO: SequenceId = SequenceId { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Largest id strictly before `self`, so `After(predecessor)` includes
    /// `self`. Saturates at [`SequenceId::ZERO`].
    pub fn predecessor(&self) -> Self {
        match (self.millis, self.seq) {
            (0, 0) => Self::ZERO,
            (millis, 0) => Self::new(millis - 1, u64::MAX),
            (millis, seq) => Self::new(millis, seq - 1),
        }
    }

    /// Next id strictly after `self` for an append at wall-clock `now_ms`.
    pub fn successor(&self, now_ms: u64) -> Self {
        if now_ms > self.millis {
            Self::new(now_ms, 0)
        } else {
            Self::new(self.millis, self.seq + 1)
        }
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid sequence id: {0:?}")]
pub struct ParseSequenceIdError(String);

impl FromStr for SequenceId {
    type Err = ParseSequenceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseSequenceIdError(s.to_string());
        let (millis, seq) = match s.split_once('-') {
            Some((m, q)) => (m, Some(q)),
            None => (s, None),
        };
        let millis = millis.parse().map_err(|_| err())?;
        let seq = match seq {
            Some(q) => q.parse().map_err(|_| err())?,
            None => 0,
        };
        Ok(Self { millis, seq })
    }
}

/// A pointer record on the trigger queue.
///
/// `job_id` is kept as the raw string the producer wrote; the consumer
/// decides what to do when it does not name a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub sequence_id: SequenceId,
    pub job_id: String,
}

/// Where the consumer starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Only triggers appended after the first read begins.
    Tail,
    /// Triggers with an id strictly greater than this one.
    After(SequenceId),
}

impl Cursor {
    /// Replays the whole stream.
    pub fn start() -> Self {
        Cursor::After(SequenceId::ZERO)
    }
}

/// Problems with the shape of a stored payload.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PayloadError {
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("field `{0}` must be a string")]
    TextNotString(&'static str),
    #[error("field `{0}` must be an array of strings")]
    ImageRefsNotStrings(&'static str),
}

/// The parts of a submission the pipeline understands.
///
/// Submissions are stored verbatim; this view is taken when the job is
/// processed, so a malformed payload fails then, not at submit time.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPayload {
    pub text: String,
    pub image_refs: Vec<String>,
    /// Echoed to the callback untouched.
    pub metadata: Value,
}

impl JobPayload {
    pub fn new(text: impl Into<String>, image_refs: Vec<String>, metadata: Value) -> Self {
        Self {
            text: text.into(),
            image_refs,
            metadata,
        }
    }

    /// Accepts `imageUrls` / `metaData` as aliases of `imageRefs` / `metadata`.
    pub fn parse(value: &Value) -> Result<Self, PayloadError> {
        let obj = value.as_object().ok_or(PayloadError::NotAnObject)?;

        let text = match obj.get("text") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(PayloadError::TextNotString("text")),
        };

        let (refs_field, refs) = first_of(obj, &["imageRefs", "imageUrls"]);
        let image_refs = match refs {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or(PayloadError::ImageRefsNotStrings(refs_field))?,
            Some(_) => return Err(PayloadError::ImageRefsNotStrings(refs_field)),
        };

        let metadata = match first_of(obj, &["metadata", "metaData"]).1 {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(other) => other.clone(),
        };

        Ok(Self {
            text,
            image_refs,
            metadata,
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "text": self.text,
            "imageRefs": self.image_refs,
            "metadata": self.metadata,
        })
    }
}

fn first_of<'a>(
    obj: &'a Map<String, Value>,
    keys: &[&'static str],
) -> (&'static str, Option<&'a Value>) {
    for &key in keys {
        if let Some(v) = obj.get(key) {
            return (key, Some(v));
        }
    }
    (keys[0], None)
}

/// Outcome of processing one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: JobId,
    pub text: String,
    pub produced_at: DateTime<Utc>,
}
