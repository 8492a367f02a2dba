//! Input protocol: stream identifiers and line-delimited messages

mod message;
mod stream;

pub use message::{MalformedInput, Message, RawRecord};
pub use stream::{MalformedStreamName, StreamId, STREAM_SEPARATOR};
