//! Pipewright Config
//!
//! This crate contains the serializable types that describe a pipeline before
//! it is executed: the block tree the user assembles, the variables they
//! declare, the plugin/node definitions published by the runner host, and the
//! application settings.
//!
//! Pipelines are loaded from JSON documents (see [`PipelineFile`]). Older
//! documents are migrated to the current layout on load.

mod block;
mod definition;
mod error;
mod pipeline;
mod settings;
mod variable;

pub use block::{Block, BlockKind, Origin, ParamValue};
pub use definition::{NodeDefinition, NodeKind, ParamDefinition, PluginDefinition};
pub use error::ConfigError;
pub use pipeline::{Canvas, CURRENT_VERSION, PipelineFile};
pub use settings::Settings;
pub use variable::{Variable, VariableValue, format_variables};
