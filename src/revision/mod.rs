//! Revision layer
//!
//! The sink stages converted entries into one revision of a backing store.
//! Stores implement `GraphBackend`; the primary target is the remote graph
//! API, with a SQLite store for local runs and an in-memory store for tests.

mod http;
pub mod memory;
mod sink;
mod sqlite;
mod traits;

pub use http::HttpBackend;
pub use memory::{BackendCall, FailPoint, MemoryBackend};
pub use sink::{RevisionSink, WriteError, DEFAULT_BATCH_SIZE};
pub use sqlite::SqliteBackend;
pub use traits::{BackendError, GraphBackend, RevisionId, RevisionStatus};
