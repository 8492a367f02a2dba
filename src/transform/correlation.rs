//! CorrelationContext: the in-memory index of every record seen this run
//!
//! Keyed by (stream, correlation key). Last write wins on a repeated key;
//! the overwritten record keeps its original position in insertion order.
//! Nothing is evicted: the index lives exactly as long as one run.

use super::types::CorrelationKey;
use crate::protocol::{RawRecord, StreamId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct StreamIndex {
    positions: HashMap<CorrelationKey, usize>,
    records: Vec<Arc<RawRecord>>,
}

/// Read-mostly index handed to transforms by shared reference.
///
/// Only the ingestion loop mutates it, and only between conversions, so it
/// needs no internal locking.
#[derive(Debug, Default)]
pub struct CorrelationContext {
    streams: HashMap<StreamId, StreamIndex>,
}

impl CorrelationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `(stream, key)`.
    ///
    /// Returns true if an earlier record was overwritten.
    pub fn record(&mut self, stream: &StreamId, key: CorrelationKey, record: Arc<RawRecord>) -> bool {
        let index = self.streams.entry(stream.clone()).or_default();

        match index.positions.get(&key) {
            Some(&pos) => {
                index.records[pos] = record;
                true
            }
            None => {
                index.positions.insert(key, index.records.len());
                index.records.push(record);
                false
            }
        }
    }

    /// Point lookup. A key never seen is simply missing.
    pub fn get(&self, stream: &StreamId, key: &CorrelationKey) -> Option<&RawRecord> {
        let index = self.streams.get(stream)?;
        let pos = *index.positions.get(key)?;
        index.records.get(pos).map(|r| r.as_ref())
    }

    /// Every record indexed for `stream` so far, in first-insertion order.
    ///
    /// Reflects only what has been read; later input is not visible.
    pub fn all(&self, stream: &StreamId) -> impl Iterator<Item = &RawRecord> + '_ {
        self.streams
            .get(stream)
            .into_iter()
            .flat_map(|index| index.records.iter().map(|r| r.as_ref()))
    }

    /// Number of distinct keys indexed for `stream`.
    pub fn count(&self, stream: &StreamId) -> usize {
        self.streams.get(stream).map(|i| i.records.len()).unwrap_or(0)
    }

    /// True once at least one record of `stream` has been indexed.
    pub fn has_stream(&self, stream: &StreamId) -> bool {
        self.count(stream) > 0
    }

    /// Total entries across all streams.
    pub fn len(&self) -> usize {
        self.streams.values().map(|i| i.records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
