//! Backend wrapper that counts store calls

use async_trait::async_trait;
use graphline::revision::BackendError;
use graphline::{DestinationEntry, GraphBackend, RevisionId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct CountingBackend {
    inner: Arc<dyn GraphBackend>,
    calls: AtomicUsize,
}

impl CountingBackend {
    pub fn wrap(inner: Arc<dyn GraphBackend>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    /// Store calls made so far, of any kind.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphBackend for CountingBackend {
    async fn open_revision(&self) -> Result<RevisionId, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.open_revision().await
    }

    async fn append_entries(
        &self,
        revision: &RevisionId,
        entries: &[DestinationEntry],
    ) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.append_entries(revision, entries).await
    }

    async fn close_revision(&self, revision: &RevisionId, commit: bool) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.close_revision(revision, commit).await
    }
}
