//! Built-in `system` plugin.

use std::cmp::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use pipewright_config::{NodeDefinition, NodeKind, ParamDefinition};

use crate::catalog::Plugin;
use crate::error::RunnerError;
use crate::runner::{ActionRunner, ConditionRunner, RunnerContext};

pub const PLUGIN_ID: &str = "system";

pub fn plugin() -> Plugin {
  Plugin::new(PLUGIN_ID, "System")
    .with_description("Core nodes available in every pipeline")
    .action(
      NodeDefinition::new("log", "Log", NodeKind::Action)
        .with_description("Write a message to the build log")
        .with_param("message", ParamDefinition::required("Message"))
        .with_output("message"),
      LogAction,
    )
    .action(
      NodeDefinition::new("sleep", "Sleep", NodeKind::Action)
        .with_description("Wait for a number of milliseconds")
        .with_param("duration", ParamDefinition::required("Duration (ms)"))
        .with_output("slept"),
      SleepAction,
    )
    .action(
      NodeDefinition::new("fail", "Fail", NodeKind::Action)
        .with_description("Stop the pipeline with an error")
        .with_param("message", ParamDefinition::optional("Message")),
      FailAction,
    )
    .condition(
      NodeDefinition::new("branch", "Branch", NodeKind::Condition)
        .with_description("Compare two values")
        .with_param("valueA", ParamDefinition::required("Value A"))
        .with_param("operator", ParamDefinition::required("Operator"))
        .with_param("valueB", ParamDefinition::required("Value B")),
      BranchCondition,
    )
}

pub struct LogAction;

#[async_trait]
impl ActionRunner for LogAction {
  async fn run(&self, ctx: &mut RunnerContext) -> Result<(), RunnerError> {
    let message = ctx.input_str("message")?;
    ctx.info(message.clone());
    ctx.set_output("message", message);
    Ok(())
  }
}

pub struct SleepAction;

#[async_trait]
impl ActionRunner for SleepAction {
  async fn run(&self, ctx: &mut RunnerContext) -> Result<(), RunnerError> {
    let ms = ctx.input_u64("duration")?;
    ctx.info(format!("Sleeping for {}ms", ms));

    let cancel = ctx.cancel_token().clone();
    tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(RunnerError::Cancelled),
      _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
    }

    ctx.set_output("slept", ms);
    Ok(())
  }
}

pub struct FailAction;

#[async_trait]
impl ActionRunner for FailAction {
  async fn run(&self, ctx: &mut RunnerContext) -> Result<(), RunnerError> {
    let message = ctx
      .input_str("message")
      .unwrap_or_else(|_| "pipeline stopped by fail node".to_string());
    Err(RunnerError::failed(message))
  }
}

pub struct BranchCondition;

#[async_trait]
impl ConditionRunner for BranchCondition {
  async fn evaluate(&self, ctx: &mut RunnerContext) -> Result<bool, RunnerError> {
    let a = ctx.input_str("valueA")?;
    let b = ctx.input_str("valueB")?;
    let operator = ctx.input_str("operator")?;
    let result = compare(&a, operator.trim(), &b)?;
    ctx.set_output("result", result);
    Ok(result)
  }
}

/// Compare numerically when both sides parse as numbers, otherwise as text.
fn compare(a: &str, operator: &str, b: &str) -> Result<bool, RunnerError> {
  let ordering = match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
    (Ok(x), Ok(y)) => x.partial_cmp(&y),
    _ => Some(a.cmp(b)),
  };
  let Some(ordering) = ordering else {
    return Ok(operator == "!=");
  };

  match operator {
    "=" | "==" => Ok(ordering == Ordering::Equal),
    "!=" => Ok(ordering != Ordering::Equal),
    "<" => Ok(ordering == Ordering::Less),
    "<=" => Ok(ordering != Ordering::Greater),
    ">" => Ok(ordering == Ordering::Greater),
    ">=" => Ok(ordering != Ordering::Less),
    other => Err(RunnerError::invalid_param(
      "operator",
      format!("unknown operator '{}'", other),
    )),
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use serde_json::{Value, json};
  use tokio_util::sync::CancellationToken;

  use super::*;
  use crate::runner::LogSink;

  fn ctx_with(inputs: &[(&str, Value)]) -> RunnerContext {
    RunnerContext::new(
      inputs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect::<HashMap<_, _>>(),
      std::env::temp_dir(),
      CancellationToken::new(),
      LogSink::discard(),
    )
  }

  #[test]
  fn test_compare_numbers_and_text() {
    assert!(compare("10", ">", "9").unwrap());
    assert!(!compare("10", "<", "9").unwrap());
    assert!(compare("1.0", "=", "1").unwrap());
    assert!(compare("abc", "<", "abd").unwrap());
    assert!(compare("abc", "!=", "ABC").unwrap());
    assert!(compare("a", "<=", "a").unwrap());
    assert!(compare("3", ">=", "3").unwrap());
    assert!(compare("x", "~", "y").is_err());
  }

  #[tokio::test]
  async fn test_log_action_sets_output() {
    let mut ctx = ctx_with(&[("message", json!("Hello"))]);
    LogAction.run(&mut ctx).await.unwrap();
    assert_eq!(ctx.outputs()["message"], json!("Hello"));
  }

  #[tokio::test]
  async fn test_fail_action() {
    let mut ctx = ctx_with(&[("message", json!("nope"))]);
    let err = FailAction.run(&mut ctx).await.unwrap_err();
    assert_eq!(err.to_string(), "nope");
  }

  #[tokio::test]
  async fn test_sleep_is_cancellable() {
    let mut ctx = ctx_with(&[("duration", json!(60_000))]);
    ctx.cancel_token().cancel();
    let err = SleepAction.run(&mut ctx).await.unwrap_err();
    assert!(matches!(err, RunnerError::Cancelled));
  }

  #[tokio::test]
  async fn test_branch_condition() {
    let mut ctx = ctx_with(&[("valueA", json!(5)), ("operator", json!(">")), ("valueB", json!("2"))]);
    assert!(BranchCondition.evaluate(&mut ctx).await.unwrap());
    assert_eq!(ctx.outputs()["result"], json!(true));
  }
}
