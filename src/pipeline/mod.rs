//! Ingestion pipeline: the loop, its error policy, and run statistics

mod error;
mod ingest;
mod policy;
mod stats;

pub use error::{PipelineError, RecordError, RunFailure};
pub use ingest::{IngestPipeline, RunReport};
pub use policy::{Disposition, ErrorPolicy};
pub use stats::{RunStats, StreamStats};
