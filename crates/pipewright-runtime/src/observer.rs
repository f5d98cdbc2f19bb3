//! Execution lifecycle hooks.
//!
//! The processor reports every step of a run to an [`ExecutionObserver`] so
//! callers can drive a UI, persist an audit trail, or just log.

use std::sync::Arc;

use async_trait::async_trait;
use pipewright_config::Block;
use pipewright_protocol::{LogLevel, LogLine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Identity of a run, handed to every hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
  pub execution_id: String,
  pub pipeline_id: String,
  pub name: String,
  /// Number of blocks in the tree, comments included.
  pub total_blocks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  Completed,
  Failed,
  Cancelled,
}

/// How a block finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExit {
  pub status: NodeStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub outputs: Option<Map<String, Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl NodeExit {
  pub fn completed(outputs: Option<Map<String, Value>>) -> Self {
    Self {
      status: NodeStatus::Completed,
      outputs,
      error: None,
    }
  }

  pub fn failed(error: impl Into<String>) -> Self {
    Self {
      status: NodeStatus::Failed,
      outputs: None,
      error: Some(error.into()),
    }
  }

  pub fn cancelled() -> Self {
    Self {
      status: NodeStatus::Cancelled,
      outputs: None,
      error: None,
    }
  }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
  Completed,
  Failed {
    node_id: Option<String>,
    message: String,
    code: Option<String>,
  },
  Cancelled,
}

/// Receives lifecycle callbacks from the processor.
///
/// All methods default to doing nothing. Hooks are awaited inline, so a slow
/// observer slows the run down. One observer may see several runs at once;
/// `run` tells them apart.
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
  async fn run_started(&self, _run: &RunInfo) {}

  async fn node_enter(&self, _run: &RunInfo, _block: &Block) {}

  async fn node_exit(&self, _run: &RunInfo, _block: &Block, _exit: &NodeExit) {}

  /// A log line, attributed to `block` when one is executing.
  async fn log(&self, _run: &RunInfo, _line: &LogLine, _block: Option<&Block>) {}

  async fn run_finished(&self, _run: &RunInfo, _outcome: &RunOutcome) {}
}

/// Discards all callbacks.
#[derive(Debug, Clone, Default)]
pub struct NoopObserver;

#[async_trait]
impl ExecutionObserver for NoopObserver {}

/// Events emitted by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  RunStarted {
    execution_id: String,
    pipeline_id: String,
  },
  NodeEntered {
    node_id: String,
  },
  NodeExited {
    node_id: String,
    status: NodeStatus,
    error: Option<String>,
  },
  Log {
    node_id: Option<String>,
    level: LogLevel,
    message: String,
  },
  RunFinished {
    execution_id: String,
    outcome: RunOutcome,
  },
}

/// Forwards callbacks as [`ExecutionEvent`]s to an unbounded channel.
///
/// Unbounded so a slow consumer never blocks the run; volume is a handful of
/// events per block.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelObserver {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  fn send(&self, event: ExecutionEvent) {
    // receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

#[async_trait]
impl ExecutionObserver for ChannelObserver {
  async fn run_started(&self, run: &RunInfo) {
    self.send(ExecutionEvent::RunStarted {
      execution_id: run.execution_id.clone(),
      pipeline_id: run.pipeline_id.clone(),
    });
  }

  async fn node_enter(&self, _run: &RunInfo, block: &Block) {
    self.send(ExecutionEvent::NodeEntered {
      node_id: block.uid.clone(),
    });
  }

  async fn node_exit(&self, _run: &RunInfo, block: &Block, exit: &NodeExit) {
    self.send(ExecutionEvent::NodeExited {
      node_id: block.uid.clone(),
      status: exit.status,
      error: exit.error.clone(),
    });
  }

  async fn log(&self, _run: &RunInfo, line: &LogLine, block: Option<&Block>) {
    self.send(ExecutionEvent::Log {
      node_id: block.map(|b| b.uid.clone()),
      level: line.level,
      message: line.message.clone(),
    });
  }

  async fn run_finished(&self, run: &RunInfo, outcome: &RunOutcome) {
    self.send(ExecutionEvent::RunFinished {
      execution_id: run.execution_id.clone(),
      outcome: outcome.clone(),
    });
  }
}

/// Fans every callback out to several observers, in order.
#[derive(Clone, Default)]
pub struct Observers(Vec<Arc<dyn ExecutionObserver>>);

impl Observers {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
    self.0.push(observer);
    self
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

#[async_trait]
impl ExecutionObserver for Observers {
  async fn run_started(&self, run: &RunInfo) {
    for o in &self.0 {
      o.run_started(run).await;
    }
  }

  async fn node_enter(&self, run: &RunInfo, block: &Block) {
    for o in &self.0 {
      o.node_enter(run, block).await;
    }
  }

  async fn node_exit(&self, run: &RunInfo, block: &Block, exit: &NodeExit) {
    for o in &self.0 {
      o.node_exit(run, block, exit).await;
    }
  }

  async fn log(&self, run: &RunInfo, line: &LogLine, block: Option<&Block>) {
    for o in &self.0 {
      o.log(run, line, block).await;
    }
  }

  async fn run_finished(&self, run: &RunInfo, outcome: &RunOutcome) {
    for o in &self.0 {
      o.run_finished(run, outcome).await;
    }
  }
}
