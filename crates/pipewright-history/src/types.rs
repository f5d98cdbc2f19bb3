use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Utc};
use pipewright_protocol::LogLevel;
use serde::{Deserialize, Serialize};

/// Status of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl BuildStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, BuildStatus::Running)
  }
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
  pub id: String,
  #[serde(with = "ts_milliseconds")]
  pub timestamp: DateTime<Utc>,
  pub level: LogLevel,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,
}

impl LogEntry {
  pub fn new(level: LogLevel, message: impl Into<String>, source: Option<String>) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      timestamp: Utc::now(),
      level,
      message: message.into(),
      source,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub code: Option<String>,
  #[serde(with = "ts_milliseconds")]
  pub timestamp: DateTime<Utc>,
}

/// One executed block within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
  /// Uid of the block.
  pub id: String,
  pub name: String,
  pub status: StepStatus,
  #[serde(with = "ts_milliseconds")]
  pub start_time: DateTime<Utc>,
  #[serde(default, with = "ts_milliseconds_option", skip_serializing_if = "Option::is_none")]
  pub end_time: Option<DateTime<Utc>>,
  /// Milliseconds.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration: Option<i64>,
  #[serde(default)]
  pub logs: Vec<LogEntry>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ExecutionError>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<serde_json::Value>,
}

/// Audit record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildHistoryEntry {
  pub id: String,
  pub pipeline_id: String,
  pub project_name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project_path: Option<String>,
  pub status: BuildStatus,
  #[serde(with = "ts_milliseconds")]
  pub start_time: DateTime<Utc>,
  #[serde(default, with = "ts_milliseconds_option", skip_serializing_if = "Option::is_none")]
  pub end_time: Option<DateTime<Utc>>,
  /// Milliseconds.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration: Option<i64>,
  #[serde(default)]
  pub steps: Vec<ExecutionStep>,
  pub total_steps: usize,
  pub completed_steps: usize,
  pub failed_steps: usize,
  pub cancelled_steps: usize,
  #[serde(default)]
  pub logs: Vec<LogEntry>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ExecutionError>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<serde_json::Value>,
  #[serde(with = "ts_milliseconds")]
  pub created_at: DateTime<Utc>,
  #[serde(with = "ts_milliseconds")]
  pub updated_at: DateTime<Utc>,
}

impl BuildHistoryEntry {
  /// A fresh entry in the `running` state.
  pub fn running(
    id: impl Into<String>,
    pipeline_id: impl Into<String>,
    project_name: impl Into<String>,
    total_steps: usize,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: id.into(),
      pipeline_id: pipeline_id.into(),
      project_name: project_name.into(),
      project_path: None,
      status: BuildStatus::Running,
      start_time: now,
      end_time: None,
      duration: None,
      steps: Vec::new(),
      total_steps,
      completed_steps: 0,
      failed_steps: 0,
      cancelled_steps: 0,
      logs: Vec::new(),
      error: None,
      output: None,
      created_at: now,
      updated_at: now,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
  pub entries: usize,
  pub bytes: u64,
  #[serde(default, with = "ts_milliseconds_option", skip_serializing_if = "Option::is_none")]
  pub oldest: Option<DateTime<Utc>>,
  #[serde(default, with = "ts_milliseconds_option", skip_serializing_if = "Option::is_none")]
  pub newest: Option<DateTime<Utc>>,
}

impl StorageInfo {
  pub(crate) fn from_entries<'a>(
    entries: impl IntoIterator<Item = &'a BuildHistoryEntry>,
    bytes: u64,
  ) -> Self {
    let mut info = StorageInfo {
      bytes,
      ..Default::default()
    };
    for entry in entries {
      info.entries += 1;
      info.oldest = Some(info.oldest.map_or(entry.created_at, |t| t.min(entry.created_at)));
      info.newest = Some(info.newest.map_or(entry.created_at, |t| t.max(entry.created_at)));
    }
    info
  }
}
