use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ACTION_EXECUTE: &str = "action:execute";
pub const CONDITION_EXECUTE: &str = "condition:execute";
pub const ACTION_CANCEL: &str = "action:cancel";

/// Error code marking a result produced by cancellation.
pub const ABORTED: &str = "ABORTED";

/// Correlation id shared by a request and every response to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
  pub fn new() -> Self {
    Self(uuid::Uuid::new_v4().to_string())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl Default for RequestId {
  fn default() -> Self {
    Self::new()
  }
}

impl From<&str> for RequestId {
  fn from(value: &str) -> Self {
    Self(value.to_string())
  }
}

impl fmt::Display for RequestId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
  pub request_id: RequestId,
  pub channel: String,
  #[serde(default)]
  pub data: Value,
}

impl Request {
  pub fn new(request_id: RequestId, channel: impl Into<String>, data: Value) -> Self {
    Self {
      request_id,
      channel: channel.into(),
      data,
    }
  }
}

/// Payload of `action:execute` and `condition:execute` requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
  pub plugin_id: String,
  pub node_id: String,
  #[serde(default)]
  pub params: HashMap<String, Value>,
  #[serde(default)]
  pub steps: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
  #[default]
  Response,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
  #[serde(rename = "type", default)]
  pub kind: EnvelopeKind,
  pub request_id: RequestId,
  pub events: Event,
}

impl Response {
  pub fn new(request_id: RequestId, event: Event) -> Self {
    Self {
      kind: EnvelopeKind::Response,
      request_id,
      events: event,
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self.events, Event::End(_))
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Debug,
  #[default]
  Info,
  Warn,
  Error,
}

impl fmt::Display for LogLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      LogLevel::Debug => "debug",
      LogLevel::Info => "info",
      LogLevel::Warn => "warn",
      LogLevel::Error => "error",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
  #[serde(default)]
  pub level: LogLevel,
  pub message: String,
}

impl LogLine {
  pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
    Self {
      level,
      message: message.into(),
    }
  }

  pub fn info(message: impl Into<String>) -> Self {
    Self::new(LogLevel::Info, message)
  }
}

/// One message in the stream answering a request.
///
/// On the wire this is `{ "type": ..., "data": ... }`. Types this side does
/// not know are kept as [`Event::Other`] with their payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub enum Event {
  Log(LogLine),
  Progress(Value),
  End(InvocationResult),
  Other { kind: String, data: Value },
}

#[derive(Serialize, Deserialize)]
struct WireEvent {
  #[serde(rename = "type")]
  kind: String,
  #[serde(default)]
  data: Value,
}

impl TryFrom<WireEvent> for Event {
  type Error = serde_json::Error;

  fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
    Ok(match wire.kind.as_str() {
      "log" => Event::Log(serde_json::from_value(wire.data)?),
      "progress" => Event::Progress(wire.data),
      "end" => Event::End(serde_json::from_value(wire.data)?),
      _ => Event::Other {
        kind: wire.kind,
        data: wire.data,
      },
    })
  }
}

impl From<Event> for WireEvent {
  fn from(event: Event) -> Self {
    let (kind, data) = match event {
      Event::Log(line) => ("log".to_string(), serde_json::to_value(line)),
      Event::Progress(data) => ("progress".to_string(), Ok(data)),
      Event::End(result) => ("end".to_string(), serde_json::to_value(result)),
      Event::Other { kind, data } => (kind, Ok(data)),
    };
    Self {
      kind,
      data: data.unwrap_or(Value::Null),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationOutput {
  #[serde(default)]
  pub outputs: Map<String, Value>,
  /// Boolean answer of a condition runner.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<Value>,
}

/// Terminal outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InvocationResult {
  Success {
    result: InvocationOutput,
  },
  Error {
    #[serde(rename = "ipcError")]
    ipc_error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
  },
}

impl InvocationResult {
  pub fn success(outputs: Map<String, Value>) -> Self {
    Self::Success {
      result: InvocationOutput {
        outputs,
        value: None,
      },
    }
  }

  pub fn condition(value: bool, outputs: Map<String, Value>) -> Self {
    Self::Success {
      result: InvocationOutput {
        outputs,
        value: Some(Value::Bool(value)),
      },
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self::Error {
      ipc_error: message.into(),
      code: None,
    }
  }

  pub fn aborted() -> Self {
    Self::Error {
      ipc_error: "aborted".to_string(),
      code: Some(ABORTED.to_string()),
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Self::Success { .. })
  }

  pub fn is_aborted(&self) -> bool {
    matches!(self, Self::Error { code: Some(code), .. } if code == ABORTED)
  }
}
