//! The block tree walker.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use pipewright_config::{Block, BlockKind, NodeDefinition, Origin, PluginDefinition, Variable, format_variables};
use pipewright_eval::{EvalContext, LoopContext, ResolvedParams, StepTable, resolve_params};
use pipewright_protocol::{
  ACTION_EXECUTE, CONDITION_EXECUTE, Event, ExecuteRequest, InvocationOutput, InvocationResult,
  Invoke, LogLevel, LogLine,
};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::RuntimeError;
use crate::observer::{ExecutionObserver, NodeExit, NoopObserver, RunInfo, RunOutcome};
use crate::result::RunResult;

/// A pipeline to run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
  pub pipeline_id: String,
  pub name: String,
  pub blocks: Vec<Block>,
  pub variables: Vec<Variable>,
}

/// Executes block trees.
///
/// A processor holds no per-run state and can run any number of pipelines,
/// each with its own step table and cancellation token.
pub struct Processor {
  invoker: Arc<dyn Invoke>,
  definitions: HashMap<(String, String), NodeDefinition>,
  observer: Arc<dyn ExecutionObserver>,
}

/// State owned by one in-flight run.
struct Run {
  info: RunInfo,
  steps: StepTable,
  variables: Map<String, Value>,
  cancel: CancellationToken,
}

impl Processor {
  pub fn new(invoker: Arc<dyn Invoke>) -> Self {
    Self {
      invoker,
      definitions: HashMap::new(),
      observer: Arc::new(NoopObserver),
    }
  }

  /// Node definitions used for required-parameter checks before invocation.
  pub fn with_definitions(mut self, plugins: Vec<PluginDefinition>) -> Self {
    for plugin in plugins {
      for node in plugin.nodes {
        self.definitions.insert((plugin.id.clone(), node.id.clone()), node);
      }
    }
    self
  }

  pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
    self.observer = observer;
    self
  }

  fn definition(&self, origin: &Origin) -> Option<&NodeDefinition> {
    self
      .definitions
      .get(&(origin.plugin_id.clone(), origin.node_id.clone()))
  }

  /// Run `request` to completion.
  ///
  /// Returns the final step table on success. A cancellation observed at any
  /// point yields [`RuntimeError::Cancelled`].
  #[instrument(
    name = "pipeline_run",
    skip(self, request, cancel),
    fields(pipeline_id = %request.pipeline_id)
  )]
  pub async fn run(
    &self,
    request: RunRequest,
    cancel: CancellationToken,
  ) -> Result<RunResult, RuntimeError> {
    let execution_id = uuid::Uuid::new_v4().to_string();
    let info = RunInfo {
      execution_id: execution_id.clone(),
      pipeline_id: request.pipeline_id.clone(),
      name: request.name.clone(),
      total_blocks: request.blocks.iter().map(Block::count).sum(),
    };

    info!(
      execution_id = %execution_id,
      pipeline_id = %request.pipeline_id,
      blocks = info.total_blocks,
      "run_started"
    );
    self.observer.run_started(&info).await;

    let mut run = Run {
      info,
      steps: StepTable::new(),
      variables: format_variables(&request.variables),
      cancel,
    };
    let root = LoopContext::new();
    let result = self.walk(&mut run, &request.blocks, &root).await;

    let outcome = match &result {
      Ok(()) => {
        info!(execution_id = %run.info.execution_id, steps = run.steps.len(), "run_completed");
        RunOutcome::Completed
      }
      Err(RuntimeError::Cancelled) => {
        warn!(execution_id = %run.info.execution_id, "run_cancelled");
        RunOutcome::Cancelled
      }
      Err(e) => {
        error!(execution_id = %run.info.execution_id, error = %e, "run_failed");
        RunOutcome::Failed {
          node_id: e.node_id().map(str::to_string),
          message: e.to_string(),
          code: e.code().map(str::to_string),
        }
      }
    };
    self.observer.run_finished(&run.info, &outcome).await;

    result.map(|()| RunResult {
      execution_id: run.info.execution_id,
      steps: run.steps,
    })
  }

  /// Visit a sibling list in order.
  fn walk<'a>(
    &'a self,
    run: &'a mut Run,
    blocks: &'a [Block],
    scope: &'a LoopContext,
  ) -> BoxFuture<'a, Result<(), RuntimeError>> {
    Box::pin(async move {
      for block in blocks {
        if run.cancel.is_cancelled() {
          debug!(node_id = %block.uid, "cancelled_before_node");
          return Err(RuntimeError::Cancelled);
        }
        self.visit(run, block, scope).await?;
      }
      Ok(())
    })
  }

  async fn visit(&self, run: &mut Run, block: &Block, scope: &LoopContext) -> Result<(), RuntimeError> {
    if let BlockKind::Comment { .. } = block.kind {
      return Ok(());
    }

    if block.disabled {
      warn!(execution_id = %run.info.execution_id, node_id = %block.uid, "node_skipped_disabled");
      let line = LogLine::new(
        LogLevel::Warn,
        format!("Skipping disabled block \"{}\"", block.display_name()),
      );
      self.observer.log(&run.info, &line, None).await;
      return Ok(());
    }

    match &block.kind {
      BlockKind::Comment { .. } => Ok(()),
      BlockKind::Event => {
        self.observer.node_enter(&run.info, block).await;
        self.observer.node_exit(&run.info, block, &NodeExit::completed(None)).await;
        Ok(())
      }
      BlockKind::Action => {
        let output = self.invoke_block(run, block, scope, ACTION_EXECUTE).await?;
        self.complete(run, block, output.outputs).await;
        Ok(())
      }
      BlockKind::Condition {
        branch_true,
        branch_false,
      } => {
        let output = self.invoke_block(run, block, scope, CONDITION_EXECUTE).await?;
        let value = match output.value {
          Some(Value::Bool(value)) => value,
          other => {
            let err = RuntimeError::InvalidCondition {
              node_id: block.uid.clone(),
              node_name: block.display_name().to_string(),
              message: format!("expected a boolean result, got {}", other.unwrap_or(Value::Null)),
            };
            return Err(self.fail(run, block, err).await);
          }
        };

        info!(execution_id = %run.info.execution_id, node_id = %block.uid, value, "condition_evaluated");
        self.complete(run, block, output.outputs).await;

        let branch = if value { branch_true } else { branch_false };
        self.walk(run, branch, scope).await
      }
      BlockKind::Loop { children } => self.visit_loop(run, block, children, scope).await,
    }
  }

  /// Enter `block`, resolve its parameters and invoke its runner.
  ///
  /// On failure the exit hook has already fired.
  async fn invoke_block(
    &self,
    run: &Run,
    block: &Block,
    scope: &LoopContext,
    channel: &str,
  ) -> Result<InvocationOutput, RuntimeError> {
    self.observer.node_enter(&run.info, block).await;
    debug!(execution_id = %run.info.execution_id, node_id = %block.uid, origin = %block.origin, "node_started");

    let resolved = self.resolve(run, block, scope);
    if let Err(err) = self.check_required(block, &resolved) {
      return Err(self.fail(run, block, err).await);
    }

    let data = ExecuteRequest {
      plugin_id: block.origin.plugin_id.clone(),
      node_id: block.origin.node_id.clone(),
      params: resolved.values,
      steps: serde_json::to_value(&run.steps).unwrap_or(Value::Null),
    };
    let data = serde_json::to_value(&data).unwrap_or_else(|_| json!({}));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let invocation = self.invoker.invoke(channel, data, &run.cancel, tx);
    let forward = async {
      while let Some(event) = rx.recv().await {
        match event {
          Event::Log(line) => self.observer.log(&run.info, &line, Some(block)).await,
          Event::Progress(progress) => debug!(node_id = %block.uid, progress = %progress, "node_progress"),
          Event::Other { kind, .. } => debug!(node_id = %block.uid, kind = %kind, "node_event_ignored"),
          Event::End(_) => {}
        }
      }
    };
    let (result, ()) = tokio::join!(invocation, forward);

    match result {
      InvocationResult::Success { result } => Ok(result),
      result if result.is_aborted() => {
        self.observer.node_exit(&run.info, block, &NodeExit::cancelled()).await;
        Err(RuntimeError::Cancelled)
      }
      InvocationResult::Error { ipc_error, code } => {
        let err = RuntimeError::NodeFailed {
          node_id: block.uid.clone(),
          node_name: block.display_name().to_string(),
          message: ipc_error,
          code,
        };
        Err(self.fail(run, block, err).await)
      }
    }
  }

  fn resolve(&self, run: &Run, block: &Block, scope: &LoopContext) -> ResolvedParams {
    let ctx = EvalContext::new(&run.steps, &run.variables, scope);
    let resolved = resolve_params(&block.params, &ctx);
    for failure in &resolved.failures {
      warn!(
        execution_id = %run.info.execution_id,
        node_id = %block.uid,
        param = %failure.param,
        error = %failure.error,
        "param_omitted"
      );
    }
    resolved
  }

  fn check_required(&self, block: &Block, resolved: &ResolvedParams) -> Result<(), RuntimeError> {
    let Some(definition) = self.definition(&block.origin) else {
      return Ok(());
    };
    match definition.missing_params(resolved.values.keys()).into_iter().next() {
      Some(param) => Err(RuntimeError::MissingParam {
        node_id: block.uid.clone(),
        node_name: block.display_name().to_string(),
        param,
      }),
      None => Ok(()),
    }
  }

  async fn visit_loop(
    &self,
    run: &mut Run,
    block: &Block,
    children: &[Block],
    scope: &LoopContext,
  ) -> Result<(), RuntimeError> {
    self.observer.node_enter(&run.info, block).await;

    let mut resolved = self.resolve(run, block, scope);
    let items = match resolved.values.remove("value") {
      Some(Value::Array(items)) => items,
      other => {
        let message = match (other, resolved.failures.iter().find(|f| f.param == "value")) {
          (Some(value), _) => format!("expected an array, got {}", value),
          (None, Some(failure)) => failure.error.to_string(),
          (None, None) => "missing param \"value\"".to_string(),
        };
        let err = RuntimeError::InvalidLoop {
          node_id: block.uid.clone(),
          node_name: block.display_name().to_string(),
          message,
        };
        return Err(self.fail(run, block, err).await);
      }
    };

    let iterations = items.len();
    debug!(execution_id = %run.info.execution_id, node_id = %block.uid, iterations, "loop_started");

    for (index, item) in items.into_iter().enumerate() {
      if run.cancel.is_cancelled() {
        self.observer.node_exit(&run.info, block, &NodeExit::cancelled()).await;
        return Err(RuntimeError::Cancelled);
      }
      let inner = scope.enter(block.uid.clone(), index, item);
      if let Err(e) = self.walk(run, children, &inner).await {
        let exit = if e.is_cancelled() {
          NodeExit::cancelled()
        } else {
          NodeExit::failed(e.to_string())
        };
        self.observer.node_exit(&run.info, block, &exit).await;
        return Err(e);
      }
    }

    let outputs = Map::from_iter([("iterations".to_string(), json!(iterations))]);
    self.complete(run, block, outputs).await;
    Ok(())
  }

  /// Record outputs, then fire the exit hook.
  async fn complete(&self, run: &mut Run, block: &Block, outputs: Map<String, Value>) {
    info!(execution_id = %run.info.execution_id, node_id = %block.uid, "node_completed");
    run.steps.record(block.uid.clone(), outputs.clone());
    self.observer.node_exit(&run.info, block, &NodeExit::completed(Some(outputs))).await;
  }

  async fn fail(&self, run: &Run, block: &Block, err: RuntimeError) -> RuntimeError {
    error!(execution_id = %run.info.execution_id, node_id = %block.uid, error = %err, "node_failed");
    self.observer.node_exit(&run.info, block, &NodeExit::failed(err.to_string())).await;
    err
  }
}
