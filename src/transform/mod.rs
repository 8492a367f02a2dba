//! Transform layer
//!
//! Transforms turn raw records into destination entries. The registry maps
//! streams to transforms; the correlation context lets a transform see
//! records of other streams that arrived earlier in the run.

mod correlation;
pub mod declarative;
mod registry;
mod traits;
mod types;

pub use correlation::CorrelationContext;
pub use declarative::{DeclarativeSpec, DeclarativeTransform};
pub use registry::{ResolveError, TransformFactory, TransformRegistry};
pub use traits::{validate_output, Transform, TransformError};
pub use types::{CorrelationKey, DestinationEntry};
