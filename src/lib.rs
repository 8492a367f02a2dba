//! Graphline: correlating stream-to-graph ingestion
//!
//! Reads a line-delimited stream of source records, converts each record into
//! typed destination entries with a per-stream transform, and commits every
//! entry of the run as one atomic revision of a graph store.
//!
//! # Core Concepts
//!
//! - **Streams**: named sources of homogeneous records (`origin__name`)
//! - **Transforms**: pure per-stream converters, resolved through a registry
//! - **Correlation context**: an in-memory index of every record seen so far,
//!   letting one stream's transform look up records of another
//! - **Revisions**: all-or-nothing batches; a failed run never becomes visible
//!
//! # Example
//!
//! ```
//! use graphline::StreamId;
//!
//! let stream: StreamId = "github__commits".parse().unwrap();
//! assert_eq!(stream.origin(), "github");
//! assert_eq!(stream.name(), "commits");
//! ```

pub mod config;
pub mod pipeline;
pub mod protocol;
pub mod revision;
pub mod transform;

pub use config::{BackendConfig, ConfigError, RunConfig};
pub use pipeline::{
    ErrorPolicy, IngestPipeline, PipelineError, RecordError, RunFailure, RunReport, RunStats,
};
pub use protocol::{Message, RawRecord, StreamId};
pub use revision::{GraphBackend, RevisionId, RevisionSink, WriteError};
pub use transform::{
    CorrelationContext, CorrelationKey, DestinationEntry, Transform, TransformError,
    TransformRegistry,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
