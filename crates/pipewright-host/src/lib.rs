//! Runner host for pipewright.
//!
//! The host owns the [`Catalog`] of plugins and serves invocation requests
//! coming from the engine: it looks up the runner behind a
//! `pluginId`/`nodeId` pair, checks the resolved parameters against the node
//! definition, runs it in a scratch directory and streams its log lines back
//! before the terminal result.
//!
//! Every request runs on its own task with its own child cancellation token,
//! so an `action:cancel` notice stops exactly one runner.

mod catalog;
mod error;
mod host;
mod runner;
pub mod system;

pub use catalog::{Catalog, NodeEntry, Plugin, Runner};
pub use error::RunnerError;
pub use host::RunnerHost;
pub use runner::{ActionRunner, ConditionRunner, LogSink, RunnerContext};
