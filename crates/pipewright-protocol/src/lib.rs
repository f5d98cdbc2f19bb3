//! Action invocation protocol.
//!
//! The engine and its runners talk over a single ordered channel. Each
//! invocation is a [`Request`] tagged with a fresh [`RequestId`]; the runner
//! answers with any number of [`Response`]s carrying the same id, the last of
//! which holds an [`Event::End`] with the [`InvocationResult`].
//!
//! ```text
//! engine                                   runner
//!   | -- { requestId, channel, data } -------> |
//!   | <------ { requestId, events: progress } - |
//!   | <------ { requestId, events: log } ------ |
//!   | <------ { requestId, events: end } ------ |
//! ```
//!
//! [`InvocationClient`] keeps the table of pending ids, demultiplexes
//! responses and races every wait against a cancellation token.

mod client;
mod error;
mod message;
mod pending;
mod transport;

pub use client::{InvocationClient, Invoke};
pub use error::ProtocolError;
pub use message::{
  ABORTED, ACTION_CANCEL, ACTION_EXECUTE, CONDITION_EXECUTE, EnvelopeKind, Event,
  ExecuteRequest, InvocationOutput, InvocationResult, LogLevel, LogLine, Request,
  RequestId, Response,
};
pub use pending::PendingTable;
pub use transport::{HostEndpoint, LocalTransport, Transport};
