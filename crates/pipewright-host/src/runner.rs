use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pipewright_protocol::{Event, LogLevel, LogLine, RequestId, Response};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RunnerError;

/// Implementation of an action node.
#[async_trait]
pub trait ActionRunner: Send + Sync {
  async fn run(&self, ctx: &mut RunnerContext) -> Result<(), RunnerError>;
}

/// Implementation of a condition node.
#[async_trait]
pub trait ConditionRunner: Send + Sync {
  async fn evaluate(&self, ctx: &mut RunnerContext) -> Result<bool, RunnerError>;
}

/// Where runner log lines go.
#[derive(Debug, Clone)]
pub struct LogSink {
  request_id: RequestId,
  responses: Option<mpsc::UnboundedSender<Response>>,
}

impl LogSink {
  /// Stream lines as `log` events answering `request_id`.
  pub fn new(request_id: RequestId, responses: mpsc::UnboundedSender<Response>) -> Self {
    Self {
      request_id,
      responses: Some(responses),
    }
  }

  /// Only trace lines locally.
  pub fn discard() -> Self {
    Self {
      request_id: RequestId::new(),
      responses: None,
    }
  }

  fn emit(&self, line: LogLine) {
    debug!(request_id = %self.request_id, level = %line.level, message = %line.message, "runner_log");
    if let Some(tx) = &self.responses {
      let _ = tx.send(Response::new(self.request_id.clone(), Event::Log(line)));
    }
  }
}

/// Everything a runner gets to work with for one invocation.
pub struct RunnerContext {
  inputs: HashMap<String, Value>,
  outputs: Map<String, Value>,
  cwd: PathBuf,
  cancel: CancellationToken,
  log: LogSink,
}

impl RunnerContext {
  pub fn new(
    inputs: HashMap<String, Value>,
    cwd: PathBuf,
    cancel: CancellationToken,
    log: LogSink,
  ) -> Self {
    Self {
      inputs,
      outputs: Map::new(),
      cwd,
      cancel,
      log,
    }
  }

  pub fn inputs(&self) -> &HashMap<String, Value> {
    &self.inputs
  }

  pub fn input(&self, name: &str) -> Option<&Value> {
    self.inputs.get(name)
  }

  /// Input rendered as text. Strings are returned verbatim.
  pub fn input_str(&self, name: &str) -> Result<String, RunnerError> {
    match self.inputs.get(name) {
      Some(Value::String(s)) => Ok(s.clone()),
      Some(other) => Ok(other.to_string()),
      None => Err(RunnerError::MissingParam {
        name: name.to_string(),
      }),
    }
  }

  pub fn input_u64(&self, name: &str) -> Result<u64, RunnerError> {
    match self.inputs.get(name) {
      Some(Value::Number(n)) => n
        .as_u64()
        .ok_or_else(|| RunnerError::invalid_param(name, format!("{} is not a positive integer", n))),
      Some(Value::String(s)) => s
        .trim()
        .parse()
        .map_err(|_| RunnerError::invalid_param(name, format!("'{}' is not a positive integer", s))),
      Some(other) => Err(RunnerError::invalid_param(name, format!("{} is not a number", other))),
      None => Err(RunnerError::MissingParam {
        name: name.to_string(),
      }),
    }
  }

  pub fn set_output(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    self.outputs.insert(key.into(), value.into());
  }

  pub fn outputs(&self) -> &Map<String, Value> {
    &self.outputs
  }

  pub fn into_outputs(self) -> Map<String, Value> {
    self.outputs
  }

  /// Scratch directory for this invocation. Removed when the runner returns.
  pub fn cwd(&self) -> &Path {
    &self.cwd
  }

  pub fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn log(&self, level: LogLevel, message: impl Into<String>) {
    self.log.emit(LogLine::new(level, message));
  }

  pub fn info(&self, message: impl Into<String>) {
    self.log(LogLevel::Info, message);
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn ctx_with(inputs: &[(&str, Value)]) -> RunnerContext {
    RunnerContext::new(
      inputs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
      std::env::temp_dir(),
      CancellationToken::new(),
      LogSink::discard(),
    )
  }

  #[test]
  fn test_input_accessors() {
    let ctx = ctx_with(&[("s", json!("text")), ("n", json!(250)), ("ns", json!(" 40 "))]);
    assert_eq!(ctx.input_str("s").unwrap(), "text");
    assert_eq!(ctx.input_str("n").unwrap(), "250");
    assert_eq!(ctx.input_u64("n").unwrap(), 250);
    assert_eq!(ctx.input_u64("ns").unwrap(), 40);
    assert!(matches!(ctx.input_u64("s"), Err(RunnerError::InvalidParam { .. })));
    assert!(matches!(ctx.input_str("nope"), Err(RunnerError::MissingParam { .. })));
  }

  #[tokio::test]
  async fn test_log_lines_are_streamed() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = RequestId::from("req-1");
    let ctx = RunnerContext::new(
      HashMap::new(),
      std::env::temp_dir(),
      CancellationToken::new(),
      LogSink::new(id.clone(), tx),
    );

    ctx.info("hello");
    let response = rx.recv().await.unwrap();
    assert_eq!(response.request_id, id);
    assert_eq!(response.events, Event::Log(LogLine::info("hello")));
  }
}
