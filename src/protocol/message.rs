//! Line-delimited input messages
//!
//! Each input line is one JSON message tagged by `type`:
//! - `RECORD`: a data record for one stream
//! - `STATE`: a checkpoint, passed through verbatim after commit
//! - anything else (`LOG`, `TRACE`, ...): ignored

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A line that cannot be parsed into a message at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed input: {0}")]
pub struct MalformedInput(pub String);

/// One data record as read from the input. Immutable once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Raw stream tag, possibly carrying a connection prefix
    pub stream: String,
    /// Record body; always a JSON object
    pub data: Map<String, Value>,
    /// When the upstream emitted the record (epoch milliseconds on the wire)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub emitted_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn new(stream: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            stream: stream.into(),
            data,
            emitted_at: Utc::now(),
        }
    }

    /// Field lookup on the record body.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
enum WireMessage {
    Record { record: RawRecord },
    State,
    #[serde(other)]
    Other,
}

/// A classified input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Record(RawRecord),
    /// The original line, kept byte-for-byte for passthrough
    Checkpoint(String),
    Other,
}

impl Message {
    /// Classify one input line.
    ///
    /// Returns `Ok(None)` for blank lines.
    pub fn parse_line(line: &str) -> Result<Option<Self>, MalformedInput> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let wire: WireMessage =
            serde_json::from_str(trimmed).map_err(|e| MalformedInput(e.to_string()))?;

        Ok(Some(match wire {
            WireMessage::Record { record } => Message::Record(record),
            WireMessage::State => Message::Checkpoint(line.trim_end_matches(['\r', '\n']).to_string()),
            WireMessage::Other => Message::Other,
        }))
    }
}
