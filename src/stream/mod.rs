//! Stream module - replayable buffering and scoped stream lifecycles.
//!
//! - [`ReplayableByteBuffer`] - materializes a source once, replays it on demand
//! - [`StreamLifecycleController`] - hands out a scoped handle with
//!   exactly-once requested/released notifications

mod lifecycle;
mod replayable;

pub use lifecycle::{BoxFuture, ExecutionMode, StreamLifecycleController, StreamListener};
pub use replayable::{ReplayableByteBuffer, CHUNK_SIZE};
