//! Infrastructure adapters: result sinks.

pub mod sink;

pub use sink::{ChannelSink, InMemoryResultSink};
