use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use pipewright_protocol::{
  ACTION_CANCEL, ACTION_EXECUTE, CONDITION_EXECUTE, Event, ExecuteRequest, HostEndpoint,
  InvocationResult, Request, RequestId, Response,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::{Catalog, Runner};
use crate::error::RunnerError;
use crate::runner::{LogSink, RunnerContext};

/// Serves invocation requests against a [`Catalog`].
#[derive(Clone)]
pub struct RunnerHost {
  inner: Arc<Inner>,
}

struct Inner {
  catalog: Arc<Catalog>,
  cache_folder: PathBuf,
  in_flight: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl RunnerHost {
  /// `cache_folder` is where per-invocation scratch directories are created.
  pub fn new(catalog: Arc<Catalog>, cache_folder: impl Into<PathBuf>) -> Self {
    Self {
      inner: Arc::new(Inner {
        catalog,
        cache_folder: cache_folder.into(),
        in_flight: Mutex::new(HashMap::new()),
      }),
    }
  }

  pub fn catalog(&self) -> &Arc<Catalog> {
    &self.inner.catalog
  }

  pub fn spawn(self, endpoint: HostEndpoint, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move { self.serve(endpoint, shutdown).await })
  }

  /// Process requests until the request stream closes or `shutdown` fires.
  pub async fn serve(&self, endpoint: HostEndpoint, shutdown: CancellationToken) {
    let HostEndpoint {
      mut requests,
      responses,
    } = endpoint;

    info!(plugins = self.inner.catalog.len(), "runner_host_started");

    loop {
      let request = tokio::select! {
        biased;
        _ = shutdown.cancelled() => break,
        request = requests.recv() => match request {
          Some(request) => request,
          None => break,
        },
      };

      match request.channel.as_str() {
        ACTION_CANCEL => self.cancel_request(&request),
        ACTION_EXECUTE | CONDITION_EXECUTE => {
          let token = shutdown.child_token();
          self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request.request_id.clone(), token.clone());

          let host = self.clone();
          let responses = responses.clone();
          tokio::spawn(async move { host.execute(request, responses, token).await });
        }
        other => {
          warn!(channel = %other, "unknown_channel");
          let _ = responses.send(Response::new(
            request.request_id,
            Event::End(InvocationResult::error(format!("unknown channel '{}'", other))),
          ));
        }
      }
    }

    info!("runner_host_stopped");
  }

  fn cancel_request(&self, request: &Request) {
    let Some(target) = request.data.get("requestId").and_then(|v| v.as_str()) else {
      warn!("cancel_notice_without_request_id");
      return;
    };
    let target = RequestId::from(target);
    let token = self
      .inner
      .in_flight
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(&target)
      .cloned();

    match token {
      Some(token) => {
        info!(request_id = %target, "invocation_cancel_requested");
        token.cancel();
      }
      None => debug!(request_id = %target, "cancel_for_unknown_request"),
    }
  }

  async fn execute(
    &self,
    request: Request,
    responses: mpsc::UnboundedSender<Response>,
    cancel: CancellationToken,
  ) {
    let id = request.request_id.clone();
    let _ = responses.send(Response::new(
      id.clone(),
      Event::Progress(json!({ "mode": "indeterminate" })),
    ));

    let result = self.run_request(request, &responses, cancel).await;

    self
      .inner
      .in_flight
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .remove(&id);

    let _ = responses.send(Response::new(id.clone(), Event::Progress(json!({ "mode": "normal" }))));
    let _ = responses.send(Response::new(id, Event::End(result)));
  }

  #[instrument(
    name = "runner_execute",
    skip(self, request, responses, cancel),
    fields(request_id = %request.request_id, channel = %request.channel)
  )]
  async fn run_request(
    &self,
    request: Request,
    responses: &mpsc::UnboundedSender<Response>,
    cancel: CancellationToken,
  ) -> InvocationResult {
    let exec: ExecuteRequest = match serde_json::from_value(request.data) {
      Ok(exec) => exec,
      Err(e) => {
        warn!(error = %e, "invalid_execute_request");
        return InvocationResult::error(format!("invalid request: {}", e));
      }
    };

    let Some(entry) = self.inner.catalog.get_runner(&exec.plugin_id, &exec.node_id) else {
      let err = RunnerError::UnknownNode {
        plugin_id: exec.plugin_id,
        node_id: exec.node_id,
      };
      warn!(error = %err, "runner_not_found");
      return InvocationResult::error(err.to_string());
    };

    if let Some(name) = entry.definition.missing_params(exec.params.keys()).into_iter().next() {
      let err = RunnerError::MissingParam { name };
      warn!(node_id = %exec.node_id, error = %err, "runner_rejected");
      return InvocationResult::error(err.to_string());
    }
    for name in exec.params.keys() {
      if !entry.definition.params.contains_key(name) {
        warn!(node_id = %exec.node_id, param = %name, "unexpected_param");
      }
    }

    // request ids come off the wire, so the directory name is ours
    let cwd = self.inner.cache_folder.join(format!("run-{}", uuid::Uuid::new_v4()));
    if let Err(e) = tokio::fs::create_dir_all(&cwd).await {
      error!(path = %cwd.display(), error = %e, "working_dir_failed");
      return InvocationResult::error(RunnerError::Io(e).to_string());
    }

    let log = LogSink::new(request.request_id.clone(), responses.clone());
    let mut ctx = RunnerContext::new(exec.params, cwd.clone(), cancel.clone(), log);

    info!(plugin_id = %exec.plugin_id, node_id = %exec.node_id, "runner_started");

    let result = match &entry.runner {
      Runner::Action(runner) => {
        let outcome = tokio::select! {
          biased;
          _ = cancel.cancelled() => Err(RunnerError::Cancelled),
          outcome = runner.run(&mut ctx) => outcome,
        };
        outcome.map(|()| InvocationResult::success(ctx.into_outputs()))
      }
      Runner::Condition(runner) => {
        let outcome = tokio::select! {
          biased;
          _ = cancel.cancelled() => Err(RunnerError::Cancelled),
          outcome = runner.evaluate(&mut ctx) => outcome,
        };
        outcome.map(|value| InvocationResult::condition(value, ctx.into_outputs()))
      }
    };

    remove_dir(&cwd).await;

    match result {
      Ok(result) => {
        info!(node_id = %exec.node_id, "runner_completed");
        result
      }
      Err(RunnerError::Cancelled) => {
        info!(node_id = %exec.node_id, "runner_cancelled");
        InvocationResult::aborted()
      }
      Err(e) => {
        warn!(node_id = %exec.node_id, error = %e, "runner_failed");
        InvocationResult::error(e.to_string())
      }
    }
  }
}

async fn remove_dir(path: &Path) {
  if let Err(e) = tokio::fs::remove_dir_all(path).await {
    debug!(path = %path.display(), error = %e, "working_dir_cleanup_failed");
  }
}
