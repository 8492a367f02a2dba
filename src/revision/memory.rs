//! In-process backing store
//!
//! Keeps revisions in memory and records every call made against it.
//! Failures can be injected at a chosen call to exercise fatal paths.

use super::traits::{BackendError, GraphBackend, RevisionId, RevisionStatus};
use crate::transform::DestinationEntry;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// One call observed by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Open,
    Append { revision: RevisionId, entries: usize },
    Close { revision: RevisionId, commit: bool },
}

/// Where an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailPoint {
    Open,
    /// The nth append call (1-based)
    Append { nth: usize },
    /// Activation only; discards still succeed
    Commit,
}

#[derive(Debug)]
struct StoredRevision {
    status: RevisionStatus,
    entries: Vec<DestinationEntry>,
    /// Activation order, for reading committed entries back in sequence
    activated: Option<u64>,
}

#[derive(Debug, Default)]
struct MemoryState {
    revisions: BTreeMap<RevisionId, StoredRevision>,
    calls: Vec<BackendCall>,
    appends: usize,
    activations: u64,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    fail_on: Option<FailPoint>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(point: FailPoint) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            fail_on: Some(point),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, BackendError> {
        self.state
            .lock()
            .map_err(|_| BackendError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn injected(point: &str) -> BackendError {
        BackendError::Unavailable(format!("injected failure on {}", point))
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Result<Vec<BackendCall>, BackendError> {
        Ok(self.lock()?.calls.clone())
    }

    pub fn revision_status(&self, id: &RevisionId) -> Result<Option<RevisionStatus>, BackendError> {
        Ok(self.lock()?.revisions.get(id).map(|r| r.status))
    }

    /// Entries of active revisions, in activation then append order.
    pub fn committed_entries(&self) -> Result<Vec<DestinationEntry>, BackendError> {
        let state = self.lock()?;
        let mut active: Vec<&StoredRevision> = state
            .revisions
            .values()
            .filter(|r| r.status == RevisionStatus::Active)
            .collect();
        active.sort_by_key(|r| r.activated);
        Ok(active.into_iter().flat_map(|r| r.entries.iter().cloned()).collect())
    }
}

#[async_trait]
impl GraphBackend for MemoryBackend {
    async fn open_revision(&self) -> Result<RevisionId, BackendError> {
        let mut state = self.lock()?;
        state.calls.push(BackendCall::Open);
        if self.fail_on == Some(FailPoint::Open) {
            return Err(Self::injected("open"));
        }

        let id = RevisionId::new();
        state.revisions.insert(
            id.clone(),
            StoredRevision {
                status: RevisionStatus::Open,
                entries: Vec::new(),
                activated: None,
            },
        );
        Ok(id)
    }

    async fn append_entries(
        &self,
        revision: &RevisionId,
        entries: &[DestinationEntry],
    ) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        state.calls.push(BackendCall::Append {
            revision: revision.clone(),
            entries: entries.len(),
        });
        state.appends += 1;
        if self.fail_on == Some(FailPoint::Append { nth: state.appends }) {
            return Err(Self::injected("append"));
        }

        let stored = state
            .revisions
            .get_mut(revision)
            .ok_or_else(|| BackendError::UnknownRevision(revision.clone()))?;
        if stored.status != RevisionStatus::Open {
            return Err(BackendError::RevisionNotOpen(revision.clone()));
        }
        stored.entries.extend_from_slice(entries);
        Ok(())
    }

    async fn close_revision(&self, revision: &RevisionId, commit: bool) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        state.calls.push(BackendCall::Close {
            revision: revision.clone(),
            commit,
        });
        if commit && self.fail_on == Some(FailPoint::Commit) {
            return Err(Self::injected("commit"));
        }

        state.activations += 1;
        let order = state.activations;
        let stored = state
            .revisions
            .get_mut(revision)
            .ok_or_else(|| BackendError::UnknownRevision(revision.clone()))?;
        if stored.status != RevisionStatus::Open {
            return Err(BackendError::RevisionNotOpen(revision.clone()));
        }

        if commit {
            stored.status = RevisionStatus::Active;
            stored.activated = Some(order);
        } else {
            stored.status = RevisionStatus::Canceled;
            stored.entries.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_invisible_until_commit() {
        let backend = MemoryBackend::new();
        let id = backend.open_revision().await.unwrap();
        backend
            .append_entries(&id, &[DestinationEntry::of_type("vcs_Commit")])
            .await
            .unwrap();

        assert!(backend.committed_entries().unwrap().is_empty());
        backend.close_revision(&id, true).await.unwrap();
        assert_eq!(backend.committed_entries().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closed_revision_rejects_writes() {
        let backend = MemoryBackend::new();
        let id = backend.open_revision().await.unwrap();
        backend.close_revision(&id, false).await.unwrap();

        let err = backend.append_entries(&id, &[]).await.unwrap_err();
        assert!(matches!(err, BackendError::RevisionNotOpen(_)));
        assert!(matches!(
            backend.close_revision(&id, true).await,
            Err(BackendError::RevisionNotOpen(_))
        ));
    }

    #[tokio::test]
    async fn unknown_revision_is_an_error() {
        let backend = MemoryBackend::new();
        let err = backend
            .close_revision(&RevisionId::from_string("nope"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::UnknownRevision(_)));
    }

    #[tokio::test]
    async fn injected_append_failure_fires_once() {
        let backend = MemoryBackend::failing_on(FailPoint::Append { nth: 2 });
        let id = backend.open_revision().await.unwrap();
        assert!(backend.append_entries(&id, &[]).await.is_ok());
        assert!(backend.append_entries(&id, &[]).await.is_err());
        assert!(backend.append_entries(&id, &[]).await.is_ok());
        assert_eq!(backend.calls().unwrap().len(), 4);
    }
}
