//! Pipeline error taxonomy
//!
//! `RecordError` is scoped to one record and subject to the error policy.
//! `PipelineError` ends the run; the revision is never committed after one.

use super::stats::RunStats;
use crate::protocol::{MalformedInput, StreamId};
use crate::revision::WriteError;
use crate::transform::{ResolveError, TransformError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error(transparent)]
    MalformedInput(#[from] MalformedInput),

    #[error("undefined stream: {0}")]
    UndefinedStream(#[from] ResolveError),

    #[error("conversion failed for stream {stream}: {source}")]
    Conversion {
        stream: StreamId,
        #[source]
        source: TransformError,
    },
}

impl RecordError {
    /// Short category name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "malformed_input",
            Self::UndefinedStream(_) => "undefined_stream",
            Self::Conversion { .. } => "conversion",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("aborted on line {line}: {source}")]
    Aborted {
        line: u64,
        #[source]
        source: RecordError,
    },

    #[error("failed to read input: {0}")]
    Input(#[from] std::io::Error),
}

/// A run that ended without committing. Statistics up to the failure are kept.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: PipelineError,
    pub stats: RunStats,
}
