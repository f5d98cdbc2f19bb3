//! Expression evaluation for pipewright.
//!
//! Block parameters are small minijinja snippets evaluated against the state a
//! run has accumulated so far:
//!
//! ```text
//! steps.export.outputs.folder          -> value produced by block `export`
//! variables.channel ~ '-beta'          -> user variable, concatenated
//! Build {{ context.loopindex }}        -> template, rendered to a string
//! ```
//!
//! Every call to [`evaluate`] builds its own sandbox and tears it down before
//! returning, so nothing leaks between evaluations. [`resolve_params`] runs the
//! evaluator over every parameter of a block and keeps going past failures.

mod context;
mod error;
mod evaluator;
mod resolver;

pub use context::{EvalContext, LoopContext, LoopFrame, StepOutputs, StepTable};
pub use error::EvaluationError;
pub use evaluator::{evaluate, format_param};
pub use resolver::{ParamFailure, ResolvedParams, escape_html, resolve_params, resolve_params_with};
