//! Run statistics
//!
//! Purely observational counters. Nothing in the pipeline reads them back to
//! make a decision.

use serde::Serialize;
use std::collections::BTreeMap;

/// Counters for one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub read: u64,
    pub processed: u64,
    pub errored: u64,
    /// Entries produced by this stream's records
    pub written: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Non-blank input lines consumed
    pub lines_read: u64,
    pub records_read: u64,
    /// Records converted successfully
    pub records_processed: u64,
    /// Destination entries offered to the sink
    pub records_written: u64,
    pub records_errored: u64,
    pub checkpoints: u64,
    /// Lines of message types the pipeline does not handle
    pub ignored: u64,
    /// Keyed by canonical stream name, or the raw tag when it did not parse
    pub streams: BTreeMap<String, StreamStats>,
    /// Entries written per destination type
    pub entry_types: BTreeMap<String, u64>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream(&mut self, stream: &str) -> &mut StreamStats {
        self.streams.entry(stream.to_string()).or_default()
    }

    pub fn line_read(&mut self) {
        self.lines_read += 1;
    }

    pub fn record_read(&mut self, stream: &str) {
        self.records_read += 1;
        self.stream(stream).read += 1;
    }

    pub fn record_processed(&mut self, stream: &str) {
        self.records_processed += 1;
        self.stream(stream).processed += 1;
    }

    /// A per-record error. `stream` is `None` when the line never yielded a record.
    pub fn record_errored(&mut self, stream: Option<&str>) {
        self.records_errored += 1;
        if let Some(stream) = stream {
            self.stream(stream).errored += 1;
        }
    }

    pub fn entry_written(&mut self, stream: &str, entry_type: &str) {
        self.records_written += 1;
        self.stream(stream).written += 1;
        *self.entry_types.entry(entry_type.to_string()).or_default() += 1;
    }

    pub fn checkpoint(&mut self) {
        self.checkpoints += 1;
    }

    pub fn ignored(&mut self) {
        self.ignored += 1;
    }

    /// Emit the totals, then one line per stream and one per entry type.
    pub fn log_summary(&self) {
        tracing::info!(
            lines_read = self.lines_read,
            records_read = self.records_read,
            records_processed = self.records_processed,
            records_written = self.records_written,
            records_errored = self.records_errored,
            checkpoints = self.checkpoints,
            ignored = self.ignored,
            "run totals"
        );
        for (stream, s) in &self.streams {
            tracing::info!(
                stream = %stream,
                read = s.read,
                processed = s.processed,
                errored = s.errored,
                written = s.written,
                "stream totals"
            );
        }
        for (entry_type, count) in &self.entry_types {
            tracing::info!(entry_type = %entry_type, written = count, "entry type totals");
        }
    }
}
