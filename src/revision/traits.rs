//! Backing-store trait definitions

use crate::transform::DestinationEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque handle for one atomic batch of writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    /// Create a new random RevisionId (UUID-based)
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Placeholder handle used when no store is contacted.
    pub fn dry_run() -> Self {
        Self("dry-run".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RevisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a revision in a store that tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionStatus {
    /// Accepting entries; nothing visible to readers
    Open,
    /// Committed; every entry visible
    Active,
    /// Discarded; no entry ever visible
    Canceled,
}

impl RevisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Active => "active",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "active" => Some(Self::Active),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

/// Errors raised by a backing store.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("unauthorized: invalid or missing API key")]
    Unauthorized,

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Response(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown revision: {0}")]
    UnknownRevision(RevisionId),

    #[error("revision {0} is not open")]
    RevisionNotOpen(RevisionId),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// The three store operations the pipeline consumes.
///
/// Implementations must guarantee that entries appended to a revision become
/// visible together when it is closed with `commit = true`, and never when it
/// is closed with `commit = false` or left open.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Start a new atomic unit of work
    async fn open_revision(&self) -> Result<RevisionId, BackendError>;

    /// Stage entries into an open revision
    async fn append_entries(
        &self,
        revision: &RevisionId,
        entries: &[DestinationEntry],
    ) -> Result<(), BackendError>;

    /// Activate (`commit = true`) or discard the revision
    async fn close_revision(&self, revision: &RevisionId, commit: bool) -> Result<(), BackendError>;
}
