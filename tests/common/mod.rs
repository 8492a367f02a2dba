//! Common test utilities for graphline integration tests
//!
//! Provides test transforms for a small GitHub-like source, input builders,
//! and a backend wrapper that counts store calls.

pub mod counting;
pub mod input;
pub mod transforms;

pub use counting::CountingBackend;
pub use input::{checkpoint_line, input_of, record_line};
pub use transforms::{orgs_stream, registry, repos_stream, OrgsTransform, ReposTransform};
