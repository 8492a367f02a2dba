//! Transform registry: resolves a stream to its transform
//!
//! Resolution order:
//! 1. Explicit registrations (test doubles, caller overrides)
//! 2. Factories registered at startup, constructed lazily on first use
//! 3. The fallback transform, if one is configured
//!
//! Factory outcomes, including misses, are memoized for the whole run. The
//! registry is built per run and dropped with it; there is no global state.

use super::traits::{Transform, TransformError};
use crate::protocol::StreamId;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Builds a transform on first use.
pub type TransformFactory =
    Box<dyn Fn() -> Result<Arc<dyn Transform>, TransformError> + Send + Sync>;

/// Why a stream could not be resolved.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("no transform registered for stream {0}")]
    NotFound(StreamId),
    #[error("transform for stream {stream} failed to construct: {reason}")]
    Construction { stream: StreamId, reason: String },
}

pub struct TransformRegistry {
    overrides: HashMap<StreamId, Arc<dyn Transform>>,
    factories: HashMap<StreamId, TransformFactory>,
    fallback: Option<Arc<dyn Transform>>,
    resolved: HashMap<StreamId, Result<Arc<dyn Transform>, ResolveError>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
            factories: HashMap::new(),
            fallback: None,
            resolved: HashMap::new(),
        }
    }

    /// Register a ready-made transform for a stream.
    ///
    /// Takes precedence over any factory for the same stream.
    pub fn register(&mut self, stream: StreamId, transform: Arc<dyn Transform>) {
        self.resolved.remove(&stream);
        self.overrides.insert(stream, transform);
    }

    /// Register a lazily-constructed transform for a stream.
    pub fn register_factory<F>(&mut self, stream: StreamId, factory: F)
    where
        F: Fn() -> Result<Arc<dyn Transform>, TransformError> + Send + Sync + 'static,
    {
        self.resolved.remove(&stream);
        self.factories.insert(stream, Box::new(factory));
    }

    /// Transform used for any stream that otherwise fails to resolve.
    pub fn with_fallback(mut self, fallback: Arc<dyn Transform>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Resolve the transform for a stream.
    pub fn resolve(&mut self, stream: &StreamId) -> Result<Arc<dyn Transform>, ResolveError> {
        if let Some(transform) = self.overrides.get(stream) {
            return Ok(transform.clone());
        }

        let outcome = match self.resolved.get(stream) {
            Some(cached) => cached.clone(),
            None => {
                let built = self.construct(stream);
                self.resolved.insert(stream.clone(), built.clone());
                built
            }
        };

        match (outcome, &self.fallback) {
            (Ok(transform), _) => Ok(transform),
            (Err(_), Some(fallback)) => Ok(fallback.clone()),
            (Err(e), None) => Err(e),
        }
    }

    fn construct(&self, stream: &StreamId) -> Result<Arc<dyn Transform>, ResolveError> {
        let factory = self
            .factories
            .get(stream)
            .ok_or_else(|| ResolveError::NotFound(stream.clone()))?;

        factory().map_err(|e| {
            tracing::error!(stream = %stream, error = %e, "transform construction failed");
            ResolveError::Construction {
                stream: stream.clone(),
                reason: e.to_string(),
            }
        })
    }

    /// Every stream with an explicit registration or a factory.
    pub fn registered_streams(&self) -> BTreeSet<StreamId> {
        self.overrides
            .keys()
            .chain(self.factories.keys())
            .cloned()
            .collect()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}
