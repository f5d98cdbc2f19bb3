//! Pipewright Runtime
//!
//! The [`Processor`] walks a pipeline's block tree depth-first, resolving each
//! block's parameters against the outputs of the blocks before it and handing
//! actions and conditions to a runner through the invocation protocol.
//!
//! Execution is strictly sequential. A block's outputs are in the step table
//! before the next block (or its first child) resolves its parameters.
//! Cancellation is checked before every block and raced against every
//! invocation, and always ends the whole run.
//!
//! Progress is reported through an [`ExecutionObserver`].

mod error;
mod observer;
mod processor;
mod result;

pub use error::RuntimeError;
pub use observer::{
  ChannelObserver, ExecutionEvent, ExecutionObserver, NodeExit, NodeStatus, NoopObserver,
  Observers, RunInfo, RunOutcome,
};
pub use processor::{Processor, RunRequest};
pub use result::RunResult;
