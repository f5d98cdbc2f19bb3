use std::collections::HashMap;

use pipewright_config::ParamValue;
use serde_json::Value;
use tracing::warn;

use crate::context::EvalContext;
use crate::error::EvaluationError;
use crate::evaluator::evaluate;

#[derive(Debug, Clone, PartialEq)]
pub struct ParamFailure {
  pub param: String,
  pub error: EvaluationError,
}

/// Outcome of resolving every parameter of a block.
///
/// Parameters that failed to evaluate are absent from `values` and listed in
/// `failures` instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParams {
  pub values: HashMap<String, Value>,
  pub failures: Vec<ParamFailure>,
}

impl ResolvedParams {
  pub fn get(&self, name: &str) -> Option<&Value> {
    self.values.get(name)
  }

  pub fn is_complete(&self) -> bool {
    self.failures.is_empty()
  }
}

/// Evaluate each raw parameter independently.
pub fn resolve_params(raw: &HashMap<String, ParamValue>, ctx: &EvalContext<'_>) -> ResolvedParams {
  resolve_params_with(raw, ctx, |v| v)
}

/// Like [`resolve_params`], applying `post` to every successfully evaluated
/// value (for example [`escape_html`] on strings before display).
pub fn resolve_params_with<F>(
  raw: &HashMap<String, ParamValue>,
  ctx: &EvalContext<'_>,
  post: F,
) -> ResolvedParams
where
  F: Fn(Value) -> Value,
{
  let mut names: Vec<&String> = raw.keys().collect();
  names.sort();

  let mut resolved = ResolvedParams::default();
  for name in names {
    let snippet = raw[name].expression();
    match evaluate(&snippet, ctx) {
      Ok(value) => {
        resolved.values.insert(name.clone(), post(value));
      }
      Err(error) => {
        warn!(
          param = %name,
          error_name = %error.name,
          error = %error.description,
          "param_resolution_failed"
        );
        resolved.failures.push(ParamFailure {
          param: name.clone(),
          error,
        });
      }
    }
  }
  resolved
}

/// Escape the five HTML-significant characters.
pub fn escape_html(input: &str) -> String {
  let mut out = String::with_capacity(input.len());
  for c in input.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      c => out.push(c),
    }
  }
  out
}
