#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
  #[error("transport closed")]
  Closed,

  #[error("transport error: {message}")]
  Transport { message: String },
}
