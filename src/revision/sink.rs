//! RevisionSink: stages converted entries into one atomic revision
//!
//! - `open()` obtains a revision; failure is fatal for the run
//! - `append()` buffers entries and writes them in batches
//! - `close(commit)` flushes and activates, or discards
//!
//! In dry-run mode every step succeeds locally and the store is never
//! contacted. Every store call is bounded by an optional timeout; a timeout
//! is a write error like any other.

use super::traits::{BackendError, GraphBackend, RevisionId};
use crate::transform::DestinationEntry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default number of entries per append call.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// A failed store interaction. Always fatal for the run.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to open revision: {0}")]
    Open(#[source] BackendError),

    #[error("failed to append to revision {revision}: {source}")]
    Append {
        revision: RevisionId,
        #[source]
        source: BackendError,
    },

    #[error("failed to close revision {revision}: {source}")]
    Close {
        revision: RevisionId,
        #[source]
        source: BackendError,
    },

    #[error("revision sink is not open")]
    NotOpen,
}

#[derive(Debug, Clone, PartialEq)]
enum SinkState {
    Idle,
    Open(RevisionId),
    Closed,
}

pub struct RevisionSink {
    backend: Arc<dyn GraphBackend>,
    dry_run: bool,
    batch_size: usize,
    timeout: Option<Duration>,
    state: SinkState,
    buffer: Vec<DestinationEntry>,
    appended: u64,
}

impl RevisionSink {
    pub fn new(backend: Arc<dyn GraphBackend>) -> Self {
        Self {
            backend,
            dry_run: false,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: None,
            state: SinkState::Idle,
            buffer: Vec::new(),
            appended: 0,
        }
    }

    /// Perform every step except the store calls.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Entries per append call; clamped to at least 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Upper bound on each store call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// The open revision, if any.
    pub fn revision(&self) -> Option<&RevisionId> {
        match &self.state {
            SinkState::Open(id) => Some(id),
            _ => None,
        }
    }

    /// Entries accepted by `append()` so far.
    pub fn entries_appended(&self) -> u64 {
        self.appended
    }

    /// Request a new revision from the store.
    pub async fn open(&mut self) -> Result<RevisionId, WriteError> {
        if let SinkState::Open(id) = &self.state {
            return Ok(id.clone());
        }

        let id = if self.dry_run {
            RevisionId::dry_run()
        } else {
            let backend = self.backend.clone();
            self.bounded("open revision", backend.open_revision())
                .await
                .map_err(WriteError::Open)?
        };

        tracing::info!(revision = %id, dry_run = self.dry_run, "revision opened");
        self.state = SinkState::Open(id.clone());
        Ok(id)
    }

    /// Stage one entry. Writes a batch once `batch_size` entries are buffered.
    pub async fn append(&mut self, entry: DestinationEntry) -> Result<(), WriteError> {
        if !matches!(self.state, SinkState::Open(_)) {
            return Err(WriteError::NotOpen);
        }

        self.appended += 1;
        if self.dry_run {
            return Ok(());
        }

        self.buffer.push(entry);
        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write any buffered entries.
    pub async fn flush(&mut self) -> Result<(), WriteError> {
        let revision = match &self.state {
            SinkState::Open(id) => id.clone(),
            _ => return Err(WriteError::NotOpen),
        };
        if self.dry_run || self.buffer.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.buffer);
        let backend = self.backend.clone();
        self.bounded("append entries", backend.append_entries(&revision, &batch))
            .await
            .map_err(|source| WriteError::Append {
                revision: revision.clone(),
                source,
            })?;

        tracing::debug!(revision = %revision, entries = batch.len(), "batch appended");
        Ok(())
    }

    /// Close the revision.
    ///
    /// With `commit = true` the buffer is flushed and the revision activated;
    /// if either step fails a discard is attempted before the error is
    /// returned. With `commit = false` buffered entries are dropped and the
    /// revision discarded. Closing an unopened or already closed sink without
    /// committing is a no-op.
    pub async fn close(&mut self, commit: bool) -> Result<(), WriteError> {
        let revision = match std::mem::replace(&mut self.state, SinkState::Closed) {
            SinkState::Open(id) => id,
            SinkState::Idle | SinkState::Closed if !commit => return Ok(()),
            _ => return Err(WriteError::NotOpen),
        };

        if self.dry_run {
            tracing::info!(revision = %revision, commit, "dry run: revision closed without store calls");
            return Ok(());
        }

        if !commit {
            self.buffer.clear();
            return self.discard(&revision).await;
        }

        self.state = SinkState::Open(revision.clone());
        let flushed = self.flush().await;
        self.state = SinkState::Closed;
        if let Err(e) = flushed {
            self.discard_after_failure(&revision).await;
            return Err(e);
        }

        let backend = self.backend.clone();
        match self
            .bounded("activate revision", backend.close_revision(&revision, true))
            .await
        {
            Ok(()) => {
                tracing::info!(revision = %revision, entries = self.appended, "revision committed");
                Ok(())
            }
            Err(source) => {
                self.discard_after_failure(&revision).await;
                Err(WriteError::Close { revision, source })
            }
        }
    }

    async fn discard(&self, revision: &RevisionId) -> Result<(), WriteError> {
        let backend = self.backend.clone();
        self.bounded("discard revision", backend.close_revision(revision, false))
            .await
            .map_err(|source| WriteError::Close {
                revision: revision.clone(),
                source,
            })?;
        tracing::warn!(revision = %revision, "revision discarded");
        Ok(())
    }

    async fn discard_after_failure(&self, revision: &RevisionId) {
        if let Err(e) = self.discard(revision).await {
            tracing::error!(revision = %revision, error = %e, "discard after failed commit also failed");
        }
    }

    async fn bounded<T>(
        &self,
        op: &str,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| BackendError::Timeout(format!("{} exceeded {:?}", op, limit)))?,
            None => call.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::memory::{BackendCall, FailPoint, MemoryBackend};
    use crate::revision::traits::RevisionStatus;
    use async_trait::async_trait;

    fn entry(n: usize) -> DestinationEntry {
        DestinationEntry::of_type("vcs_Commit").with_field("sha", format!("c{}", n))
    }

    fn sink_with(backend: &Arc<MemoryBackend>) -> RevisionSink {
        RevisionSink::new(backend.clone())
    }

    // === Scenario: Commit makes all entries visible together ===
    #[tokio::test]
    async fn commit_activates_revision() {
        let backend = Arc::new(MemoryBackend::new());
        let mut sink = sink_with(&backend).with_batch_size(2);

        let id = sink.open().await.unwrap();
        for n in 0..5 {
            sink.append(entry(n)).await.unwrap();
        }
        // two full batches written, one entry still buffered
        assert!(backend.committed_entries().unwrap().is_empty());

        sink.close(true).await.unwrap();
        assert_eq!(backend.revision_status(&id).unwrap(), Some(RevisionStatus::Active));
        assert_eq!(backend.committed_entries().unwrap().len(), 5);
        assert_eq!(sink.entries_appended(), 5);

        let appends = backend
            .calls()
            .unwrap()
            .into_iter()
            .filter(|c| matches!(c, BackendCall::Append { .. }))
            .count();
        assert_eq!(appends, 3);
    }

    #[tokio::test]
    async fn close_without_commit_discards() {
        let backend = Arc::new(MemoryBackend::new());
        let mut sink = sink_with(&backend).with_batch_size(1);

        let id = sink.open().await.unwrap();
        sink.append(entry(0)).await.unwrap();
        sink.close(false).await.unwrap();

        assert_eq!(backend.revision_status(&id).unwrap(), Some(RevisionStatus::Canceled));
        assert!(backend.committed_entries().unwrap().is_empty());
    }

    // === Scenario: Dry run never contacts the store ===
    #[tokio::test]
    async fn dry_run_makes_no_calls() {
        let backend = Arc::new(MemoryBackend::new());
        let mut sink = sink_with(&backend).with_dry_run(true).with_batch_size(1);

        assert_eq!(sink.open().await.unwrap(), RevisionId::dry_run());
        for n in 0..3 {
            sink.append(entry(n)).await.unwrap();
        }
        sink.close(true).await.unwrap();

        assert_eq!(sink.entries_appended(), 3);
        assert!(backend.calls().unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_failure_is_write_error() {
        let backend = Arc::new(MemoryBackend::failing_on(FailPoint::Open));
        let mut sink = sink_with(&backend);
        assert!(matches!(sink.open().await, Err(WriteError::Open(_))));
        assert!(matches!(sink.append(entry(0)).await, Err(WriteError::NotOpen)));
    }

    // === Scenario: Failed batch during commit discards the revision ===
    #[tokio::test]
    async fn failed_final_flush_discards() {
        let backend = Arc::new(MemoryBackend::failing_on(FailPoint::Append { nth: 1 }));
        let mut sink = sink_with(&backend).with_batch_size(10);

        let id = sink.open().await.unwrap();
        sink.append(entry(0)).await.unwrap();
        let err = sink.close(true).await.unwrap_err();

        assert!(matches!(err, WriteError::Append { .. }));
        assert_eq!(backend.revision_status(&id).unwrap(), Some(RevisionStatus::Canceled));
        assert!(backend.committed_entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_activation_attempts_discard() {
        let backend = Arc::new(MemoryBackend::failing_on(FailPoint::Commit));
        let mut sink = sink_with(&backend);

        let id = sink.open().await.unwrap();
        sink.append(entry(0)).await.unwrap();
        assert!(matches!(sink.close(true).await, Err(WriteError::Close { .. })));

        let calls = backend.calls().unwrap();
        assert_eq!(
            calls.last(),
            Some(&BackendCall::Close { revision: id.clone(), commit: false })
        );
        assert_eq!(backend.revision_status(&id).unwrap(), Some(RevisionStatus::Canceled));
    }

    #[tokio::test]
    async fn closing_twice_without_commit_is_noop() {
        let backend = Arc::new(MemoryBackend::new());
        let mut sink = sink_with(&backend);
        sink.close(false).await.unwrap();

        sink.open().await.unwrap();
        sink.close(false).await.unwrap();
        sink.close(false).await.unwrap();
        assert!(matches!(sink.close(true).await, Err(WriteError::NotOpen)));
    }

    struct StalledBackend;

    #[async_trait]
    impl GraphBackend for StalledBackend {
        async fn open_revision(&self) -> Result<RevisionId, BackendError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(RevisionId::new())
        }
        async fn append_entries(&self, _: &RevisionId, _: &[DestinationEntry]) -> Result<(), BackendError> {
            Ok(())
        }
        async fn close_revision(&self, _: &RevisionId, _: bool) -> Result<(), BackendError> {
            Ok(())
        }
    }

    // === Scenario: Store call exceeding the timeout is a write error ===
    #[tokio::test]
    async fn timeout_is_write_error() {
        let mut sink =
            RevisionSink::new(Arc::new(StalledBackend)).with_timeout(Duration::from_millis(20));
        match sink.open().await {
            Err(WriteError::Open(BackendError::Timeout(_))) => {}
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
