//! Ingestion loop
//!
//! Single write path: `run(input) -> RunReport`.
//!
//! Loop states:
//! 1. Reading: pull the next line; end of input moves to Draining
//! 2. Processing: classify the line, resolve the stream's transform, index the
//!    record, convert it, and stage its entries in the revision
//! 3. Draining: commit the revision, then release buffered checkpoints
//!
//! Records are handled strictly in arrival order, one at a time. A transform
//! that depends on another stream only sees that stream's records if they
//! arrived earlier; the loop warns once per pair when a dependency stream is
//! still empty, but never reorders input.

use super::error::{PipelineError, RecordError, RunFailure};
use super::policy::{Disposition, ErrorPolicy};
use super::stats::RunStats;
use crate::protocol::{MalformedInput, Message, RawRecord, StreamId};
use crate::revision::{RevisionId, RevisionSink, WriteError};
use crate::transform::{validate_output, CorrelationContext, Transform, TransformRegistry};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Result of a committed run.
#[derive(Debug)]
pub struct RunReport {
    pub stats: RunStats,
    /// Checkpoint lines in arrival order, safe to acknowledge upstream
    pub checkpoints: Vec<String>,
    pub revision: RevisionId,
    pub dry_run: bool,
}

enum LoopState {
    Reading,
    /// Raw line bytes without the terminator
    Processing(Vec<u8>),
    Draining,
}

/// Why one line did not complete.
enum LineError {
    /// Subject to the error policy
    Record {
        error: RecordError,
        stream: Option<String>,
    },
    /// Always fatal
    Write(WriteError),
}

impl LineError {
    fn record(error: impl Into<RecordError>, stream: Option<String>) -> Self {
        Self::Record {
            error: error.into(),
            stream,
        }
    }
}

/// One ingestion run. Built per run and consumed by `run()`.
pub struct IngestPipeline {
    registry: TransformRegistry,
    context: CorrelationContext,
    sink: RevisionSink,
    policy: ErrorPolicy,
    stream_prefix: Option<String>,
    stats: RunStats,
    checkpoints: Vec<String>,
    /// (transform stream, dependency) pairs already warned about
    warned: HashSet<(StreamId, StreamId)>,
}

impl IngestPipeline {
    pub fn new(registry: TransformRegistry, sink: RevisionSink) -> Self {
        Self {
            registry,
            context: CorrelationContext::new(),
            sink,
            policy: ErrorPolicy::default(),
            stream_prefix: None,
            stats: RunStats::new(),
            checkpoints: Vec::new(),
            warned: HashSet::new(),
        }
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Prefix stripped from stream tags before they are parsed.
    pub fn with_stream_prefix(mut self, prefix: Option<String>) -> Self {
        self.stream_prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    /// Consume `input` to the end and commit, or fail without committing.
    pub async fn run<R>(mut self, input: R) -> Result<RunReport, RunFailure>
    where
        R: AsyncBufRead + Unpin,
    {
        tracing::info!(policy = %self.policy, dry_run = self.sink.is_dry_run(), "ingestion started");
        if let Err(e) = self.sink.open().await {
            return Err(self.abort(e.into()).await);
        }

        let mut lines = input.split(b'\n');
        let mut line_no: u64 = 0;
        let mut state = LoopState::Reading;

        loop {
            state = match state {
                LoopState::Reading => match lines.next_segment().await {
                    Ok(Some(mut line)) => {
                        line_no += 1;
                        if line.last() == Some(&b'\r') {
                            line.pop();
                        }
                        LoopState::Processing(line)
                    }
                    Ok(None) => LoopState::Draining,
                    Err(e) => return Err(self.abort(e.into()).await),
                },
                LoopState::Processing(line) => {
                    match self.process_bytes(line).await {
                        Ok(()) => {}
                        Err(LineError::Write(e)) => return Err(self.abort(e.into()).await),
                        Err(LineError::Record { error, stream }) => {
                            self.stats.record_errored(stream.as_deref());
                            tracing::warn!(
                                line = line_no,
                                stream = stream.as_deref().unwrap_or("-"),
                                kind = error.kind(),
                                error = %error,
                                "record failed"
                            );
                            if self.policy.decide(&error) == Disposition::Abort {
                                let error = PipelineError::Aborted {
                                    line: line_no,
                                    source: error,
                                };
                                return Err(self.abort(error).await);
                            }
                        }
                    }
                    LoopState::Reading
                }
                LoopState::Draining => break,
            };
        }

        self.drain().await
    }

    /// Decode one line. Invalid UTF-8 is a malformed record, not an I/O failure.
    async fn process_bytes(&mut self, line: Vec<u8>) -> Result<(), LineError> {
        match String::from_utf8(line) {
            Ok(line) => self.process_line(&line).await,
            Err(e) => {
                self.stats.line_read();
                Err(LineError::record(
                    MalformedInput(format!("invalid UTF-8: {}", e.utf8_error())),
                    None,
                ))
            }
        }
    }

    async fn process_line(&mut self, line: &str) -> Result<(), LineError> {
        let message = match Message::parse_line(line) {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.stats.line_read();
                return Err(LineError::record(e, None));
            }
        };
        self.stats.line_read();

        match message {
            Message::Record(record) => self.process_record(record).await,
            Message::Checkpoint(raw) => {
                self.stats.checkpoint();
                self.checkpoints.push(raw);
                Ok(())
            }
            Message::Other => {
                self.stats.ignored();
                tracing::debug!("ignoring non-record message");
                Ok(())
            }
        }
    }

    async fn process_record(&mut self, record: RawRecord) -> Result<(), LineError> {
        let stream = match StreamId::parse_with_prefix(&record.stream, self.stream_prefix.as_deref()) {
            Ok(stream) => stream,
            Err(e) => {
                self.stats.record_read(&record.stream);
                return Err(LineError::record(
                    MalformedInput(e.to_string()),
                    Some(record.stream),
                ));
            }
        };
        let name = stream.canonical();
        self.stats.record_read(&name);

        let transform = self
            .registry
            .resolve(&stream)
            .map_err(|e| LineError::record(e, Some(name.clone())))?;

        let record = Arc::new(record);
        if let Some(key) = transform.extract_key(&record) {
            if self.context.record(&stream, key, record.clone()) {
                tracing::trace!(stream = %stream, "correlation key overwritten");
            }
        }
        self.check_dependencies(&stream, transform.as_ref());

        let entries = transform
            .convert(&record, &self.context)
            .and_then(|entries| validate_output(transform.as_ref(), &entries).map(|()| entries))
            .map_err(|source| {
                LineError::record(
                    RecordError::Conversion {
                        stream: stream.clone(),
                        source,
                    },
                    Some(name.clone()),
                )
            })?;
        self.stats.record_processed(&name);

        for entry in entries {
            let entry_type = entry.entry_type.clone();
            self.sink.append(entry).await.map_err(LineError::Write)?;
            self.stats.entry_written(&name, &entry_type);
        }
        Ok(())
    }

    fn check_dependencies(&mut self, stream: &StreamId, transform: &dyn Transform) {
        for dep in transform.dependencies() {
            if self.context.has_stream(dep) {
                continue;
            }
            if self.warned.insert((stream.clone(), dep.clone())) {
                tracing::warn!(
                    stream = %stream,
                    dependency = %dep,
                    transform = transform.id(),
                    "converting before any record of a dependency stream was seen; lookups will miss"
                );
            }
        }
    }

    async fn drain(mut self) -> Result<RunReport, RunFailure> {
        let revision = self.sink.revision().cloned().unwrap_or_else(RevisionId::dry_run);
        if let Err(e) = self.sink.close(true).await {
            tracing::error!(error = %e, "commit failed");
            self.checkpoints.clear();
            self.stats.log_summary();
            return Err(RunFailure {
                error: e.into(),
                stats: self.stats,
            });
        }

        self.stats.log_summary();
        tracing::info!(
            revision = %revision,
            checkpoints = self.checkpoints.len(),
            "ingestion committed"
        );
        Ok(RunReport {
            stats: self.stats,
            checkpoints: self.checkpoints,
            revision,
            dry_run: self.sink.is_dry_run(),
        })
    }

    /// Discard the revision and drop buffered checkpoints.
    async fn abort(mut self, error: PipelineError) -> RunFailure {
        tracing::error!(error = %error, "ingestion aborted");
        if let Err(e) = self.sink.close(false).await {
            tracing::error!(error = %e, "failed to discard revision");
        }
        self.checkpoints.clear();
        self.stats.log_summary();
        RunFailure {
            error,
            stats: self.stats,
        }
    }
}
