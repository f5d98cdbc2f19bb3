use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ProtocolError;
use crate::message::{Request, Response};

/// Outbound half of the channel to the runner side.
///
/// Responses travel the other way and are fed to
/// [`InvocationClient::listen`](crate::InvocationClient::listen).
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: Request) -> Result<(), ProtocolError>;
}

/// In-process transport backed by unbounded channels.
#[derive(Debug, Clone)]
pub struct LocalTransport {
  requests: mpsc::UnboundedSender<Request>,
}

/// The runner's end of a [`LocalTransport`].
#[derive(Debug)]
pub struct HostEndpoint {
  pub requests: mpsc::UnboundedReceiver<Request>,
  pub responses: mpsc::UnboundedSender<Response>,
}

impl LocalTransport {
  /// Create a connected transport, the host endpoint, and the stream of
  /// responses the host sends back.
  pub fn pair() -> (Self, HostEndpoint, mpsc::UnboundedReceiver<Response>) {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (resp_tx, resp_rx) = mpsc::unbounded_channel();
    let transport = Self { requests: req_tx };
    let endpoint = HostEndpoint {
      requests: req_rx,
      responses: resp_tx,
    };
    (transport, endpoint, resp_rx)
  }
}

#[async_trait]
impl Transport for LocalTransport {
  async fn send(&self, request: Request) -> Result<(), ProtocolError> {
    self.requests.send(request).map_err(|_| ProtocolError::Closed)
  }
}
