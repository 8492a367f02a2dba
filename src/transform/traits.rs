//! Transform trait: the contract per-stream converters implement
//!
//! A transform turns one raw record into zero or more destination entries.
//! It is a pure function of the record and a read-only view of every record
//! indexed so far; it performs no I/O and owns no concurrency.

use super::correlation::CorrelationContext;
use super::types::{CorrelationKey, DestinationEntry};
use crate::protocol::{RawRecord, StreamId};
use thiserror::Error;

/// Errors a transform can raise for a single record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("missing field: {0}")]
    MissingField(String),
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
    #[error("invalid output: {0}")]
    InvalidOutput(String),
    #[error("transform error: {0}")]
    Internal(String),
}

/// The contract stream-specific converters implement.
pub trait Transform: Send + Sync {
    /// Identifier used in logs and statistics
    fn id(&self) -> &str;

    /// Destination types this transform may emit.
    ///
    /// An empty slice means "undeclared": output types are not checked.
    fn destination_types(&self) -> &[String];

    /// Streams whose records must be indexed before this transform runs.
    ///
    /// Ordering is a contract with the upstream producer; the pipeline does
    /// not buffer or reorder input to satisfy it.
    fn dependencies(&self) -> &[StreamId] {
        &[]
    }

    /// The key this record is indexed under, if any.
    ///
    /// Defaults to the record's `id` field. `None` means the record is not
    /// indexed, which is not an error.
    fn extract_key(&self, record: &RawRecord) -> Option<CorrelationKey> {
        record.field("id").and_then(CorrelationKey::from_value)
    }

    /// Convert one record. The record itself is already indexed in `context`.
    fn convert(
        &self,
        record: &RawRecord,
        context: &CorrelationContext,
    ) -> Result<Vec<DestinationEntry>, TransformError>;
}

/// Reject output entries the transform did not declare.
pub fn validate_output(
    transform: &dyn Transform,
    entries: &[DestinationEntry],
) -> Result<(), TransformError> {
    let declared = transform.destination_types();
    for entry in entries {
        if entry.entry_type.is_empty() {
            return Err(TransformError::InvalidOutput(format!(
                "{} produced an entry with an empty type",
                transform.id()
            )));
        }
        if !declared.is_empty() && !declared.iter().any(|t| *t == entry.entry_type) {
            return Err(TransformError::InvalidOutput(format!(
                "{} produced undeclared type '{}'",
                transform.id(),
                entry.entry_type
            )));
        }
    }
    Ok(())
}
