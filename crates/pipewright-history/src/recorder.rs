use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pipewright_config::Block;
use pipewright_protocol::{LogLevel, LogLine};
use pipewright_runtime::{ExecutionObserver, NodeExit, NodeStatus, RunInfo, RunOutcome};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::HistoryStore;
use crate::error::HistoryError;
use crate::types::{
  BuildHistoryEntry, BuildStatus, ExecutionError, ExecutionStep, LogEntry, StepStatus,
};

/// Writes the history of runs to a [`HistoryStore`].
///
/// Used as an [`ExecutionObserver`]: the entry is saved when the run starts,
/// rewritten whenever a step finishes and finalized when the run ends. Store
/// failures are logged and never affect the run.
///
/// One recorder can be shared by concurrent runs; each is tracked under its
/// execution id.
pub struct Recorder {
  store: Arc<dyn HistoryStore>,
  project_path: Option<String>,
  active: Mutex<HashMap<String, ActiveRun>>,
}

struct ActiveRun {
  entry: BuildHistoryEntry,
  /// Indices into `entry.steps` of the steps entered but not yet exited.
  open: Vec<usize>,
}

impl ActiveRun {
  fn open_step(&mut self, uid: &str) -> Option<&mut ExecutionStep> {
    let idx = *self.open.iter().rev().find(|&&i| self.entry.steps[i].id == uid)?;
    self.entry.steps.get_mut(idx)
  }
}

impl Recorder {
  pub fn new(store: Arc<dyn HistoryStore>) -> Self {
    Self {
      store,
      project_path: None,
      active: Mutex::new(HashMap::new()),
    }
  }

  pub fn with_project_path(mut self, path: impl Into<String>) -> Self {
    self.project_path = Some(path.into());
    self
  }

  /// Open the entry for `run` and return its id.
  pub async fn begin(&self, run: &RunInfo) -> String {
    let mut entry = BuildHistoryEntry::running(
      &run.execution_id,
      &run.pipeline_id,
      &run.name,
      run.total_blocks,
    );
    entry.project_path = self.project_path.clone();

    if let Err(e) = self.store.save(&entry).await {
      warn!(execution_id = %entry.id, error = %e, "history_save_failed");
    }

    let state = ActiveRun {
      entry,
      open: Vec::new(),
    };
    let mut active = self.active.lock().await;
    if active.insert(run.execution_id.clone(), state).is_some() {
      warn!(execution_id = %run.execution_id, "history_run_restarted");
    }
    run.execution_id.clone()
  }

  /// Finalize the entry `id` with `outcome`. Returns the final record.
  pub async fn end(&self, id: &str, outcome: &RunOutcome) -> Option<BuildHistoryEntry> {
    let Some(mut run) = self.active.lock().await.remove(id) else {
      warn!(execution_id = %id, "history_end_for_unknown_run");
      return None;
    };

    let now = Utc::now();
    let (status, open_status) = match outcome {
      RunOutcome::Completed => (BuildStatus::Completed, StepStatus::Completed),
      RunOutcome::Failed { .. } => (BuildStatus::Failed, StepStatus::Failed),
      RunOutcome::Cancelled => (BuildStatus::Cancelled, StepStatus::Cancelled),
    };

    for idx in std::mem::take(&mut run.open) {
      let step = &mut run.entry.steps[idx];
      step.status = open_status;
      step.end_time = Some(now);
      step.duration = Some((now - step.start_time).num_milliseconds());
    }

    let entry = &mut run.entry;
    entry.status = status;
    entry.end_time = Some(now);
    entry.duration = Some((now - entry.start_time).num_milliseconds());
    let summary = match outcome {
      RunOutcome::Completed => LogEntry::new(LogLevel::Info, "Build completed", None),
      RunOutcome::Cancelled => LogEntry::new(LogLevel::Warn, "Build cancelled", None),
      RunOutcome::Failed { message, code, .. } => {
        entry.error = Some(ExecutionError {
          message: message.clone(),
          code: code.clone(),
          timestamp: now,
        });
        LogEntry::new(LogLevel::Error, format!("Build failed: {}", message), None)
      }
    };
    entry.logs.push(summary);

    self.persist(entry).await;
    debug!(execution_id = %entry.id, status = ?entry.status, "history_finalized");
    Some(run.entry)
  }

  /// Snapshot of the in-flight run `id`.
  pub async fn current(&self, id: &str) -> Option<BuildHistoryEntry> {
    self.active.lock().await.get(id).map(|a| a.entry.clone())
  }

  /// Number of runs started but not yet finalized.
  pub async fn active_runs(&self) -> usize {
    self.active.lock().await.len()
  }

  async fn persist(&self, entry: &mut BuildHistoryEntry) {
    match self.store.update(entry).await {
      Ok(stored) => entry.updated_at = stored.updated_at,
      Err(HistoryError::NotFound(_)) => {
        // the initial save failed; try again with a full insert
        entry.updated_at = Utc::now();
        if let Err(e) = self.store.save(entry).await {
          warn!(execution_id = %entry.id, error = %e, "history_save_failed");
        }
      }
      Err(e) => warn!(execution_id = %entry.id, error = %e, "history_update_failed"),
    }
  }
}

#[async_trait]
impl ExecutionObserver for Recorder {
  async fn run_started(&self, run: &RunInfo) {
    self.begin(run).await;
  }

  async fn node_enter(&self, info: &RunInfo, block: &Block) {
    let mut active = self.active.lock().await;
    let Some(run) = active.get_mut(&info.execution_id) else {
      return;
    };
    run.entry.steps.push(ExecutionStep {
      id: block.uid.clone(),
      name: block.display_name().to_string(),
      status: StepStatus::Running,
      start_time: Utc::now(),
      end_time: None,
      duration: None,
      logs: Vec::new(),
      error: None,
      output: None,
    });
    let idx = run.entry.steps.len() - 1;
    run.open.push(idx);
  }

  async fn node_exit(&self, info: &RunInfo, block: &Block, exit: &NodeExit) {
    let mut active = self.active.lock().await;
    let Some(run) = active.get_mut(&info.execution_id) else {
      return;
    };
    let Some(pos) = run
      .open
      .iter()
      .rposition(|&i| run.entry.steps[i].id == block.uid)
    else {
      debug!(node_id = %block.uid, "history_exit_without_enter");
      return;
    };
    let idx = run.open.remove(pos);

    let now = Utc::now();
    let step = &mut run.entry.steps[idx];
    step.end_time = Some(now);
    step.duration = Some((now - step.start_time).num_milliseconds());
    step.output = exit.outputs.clone().map(serde_json::Value::Object);
    step.status = match exit.status {
      NodeStatus::Completed => StepStatus::Completed,
      NodeStatus::Failed => StepStatus::Failed,
      NodeStatus::Cancelled => StepStatus::Cancelled,
    };
    if let Some(message) = &exit.error {
      step.error = Some(ExecutionError {
        message: message.clone(),
        code: None,
        timestamp: now,
      });
    }

    match exit.status {
      NodeStatus::Completed => run.entry.completed_steps += 1,
      NodeStatus::Failed => run.entry.failed_steps += 1,
      NodeStatus::Cancelled => run.entry.cancelled_steps += 1,
    }

    self.persist(&mut run.entry).await;
  }

  async fn log(&self, info: &RunInfo, line: &LogLine, block: Option<&Block>) {
    let mut active = self.active.lock().await;
    let Some(run) = active.get_mut(&info.execution_id) else {
      return;
    };
    let entry = LogEntry::new(line.level, line.message.clone(), block.map(|b| b.uid.clone()));
    match block.and_then(|b| run.open_step(&b.uid)) {
      Some(step) => step.logs.push(entry),
      None => run.entry.logs.push(entry),
    }
  }

  async fn run_finished(&self, run: &RunInfo, outcome: &RunOutcome) {
    self.end(&run.execution_id, outcome).await;
  }
}
