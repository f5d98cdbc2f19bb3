use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, instrument, warn};

use crate::message::{ACTION_CANCEL, Event, InvocationResult, Request, RequestId, Response};
use crate::pending::PendingTable;
use crate::transport::{HostEndpoint, LocalTransport, Transport};

/// Something that can carry out an invocation.
///
/// Intermediate events (`log`, `progress`, ...) are pushed into `events`; the
/// sender is dropped once the result is known, so a consumer draining the
/// receiver sees every event before the stream ends.
#[async_trait]
pub trait Invoke: Send + Sync {
  async fn invoke(
    &self,
    channel: &str,
    data: Value,
    cancel: &CancellationToken,
    events: mpsc::UnboundedSender<Event>,
  ) -> InvocationResult;
}

pub struct InvocationClient {
  transport: Arc<dyn Transport>,
  pending: Arc<PendingTable>,
}

/// Removes the pending entry on every exit path of a wait.
struct PendingGuard<'a> {
  table: &'a PendingTable,
  id: RequestId,
}

impl Drop for PendingGuard<'_> {
  fn drop(&mut self) {
    if self.table.remove(&self.id) {
      debug!(request_id = %self.id, "pending_request_released");
    }
  }
}

impl InvocationClient {
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self {
      transport,
      pending: Arc::new(PendingTable::new()),
    }
  }

  /// An in-process client along with the endpoint a host should serve.
  ///
  /// Must be called from within a tokio runtime.
  pub fn local() -> (Self, HostEndpoint) {
    let (transport, endpoint, responses) = LocalTransport::pair();
    let client = Self::new(Arc::new(transport));
    client.listen(responses);
    (client, endpoint)
  }

  pub fn pending(&self) -> &Arc<PendingTable> {
    &self.pending
  }

  /// Feed a stream of responses into the pending table.
  pub fn listen(&self, mut responses: mpsc::UnboundedReceiver<Response>) -> JoinHandle<()> {
    let pending = Arc::clone(&self.pending);
    tokio::spawn(async move {
      while let Some(response) = responses.recv().await {
        pending.dispatch(response);
      }
      debug!("response_stream_closed");
    })
  }

  /// Send a request on `channel` and wait for its terminal result.
  ///
  /// Cancellation resolves the wait immediately with an aborted result and
  /// sends a best-effort `action:cancel` notice; a result the runner produces
  /// afterwards is discarded.
  #[instrument(
    name = "invoke",
    skip(self, data, cancel, events),
    fields(channel = %channel, request_id = tracing::field::Empty)
  )]
  pub async fn request(
    &self,
    channel: &str,
    data: Value,
    cancel: &CancellationToken,
    events: mpsc::UnboundedSender<Event>,
  ) -> InvocationResult {
    if cancel.is_cancelled() {
      return InvocationResult::aborted();
    }

    let id = RequestId::new();
    Span::current().record("request_id", id.as_str());

    let mut incoming = self.pending.register(id.clone());
    let _guard = PendingGuard {
      table: &self.pending,
      id: id.clone(),
    };

    if let Err(e) = self.transport.send(Request::new(id.clone(), channel, data)).await {
      warn!(error = %e, "invocation_send_failed");
      return InvocationResult::error(e.to_string());
    }

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          debug!("invocation_cancelled");
          self.notify_cancel(&id).await;
          return InvocationResult::aborted();
        }

        event = incoming.recv() => match event {
          Some(Event::End(result)) => return result,
          Some(event) => {
            let _ = events.send(event);
          }
          None => return InvocationResult::error("connection closed before a result was received"),
        }
      }
    }
  }

  async fn notify_cancel(&self, id: &RequestId) {
    let notice = Request::new(RequestId::new(), ACTION_CANCEL, json!({ "requestId": id }));
    if let Err(e) = self.transport.send(notice).await {
      debug!(error = %e, "cancel_notice_failed");
    }
  }
}

#[async_trait]
impl Invoke for InvocationClient {
  async fn invoke(
    &self,
    channel: &str,
    data: Value,
    cancel: &CancellationToken,
    events: mpsc::UnboundedSender<Event>,
  ) -> InvocationResult {
    self.request(channel, data, cancel, events).await
  }
}
