/// Errors a runner can report.
///
/// The display text is what the engine receives as the error message.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
  /// The runner observed cancellation.
  #[error("cancelled")]
  Cancelled,

  #[error("Missing param \"{name}\"")]
  MissingParam { name: String },

  #[error("Invalid param \"{name}\": {message}")]
  InvalidParam { name: String, message: String },

  #[error("no runner for {plugin_id}::{node_id}")]
  UnknownNode { plugin_id: String, node_id: String },

  #[error("{message}")]
  Failed { message: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl RunnerError {
  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed {
      message: message.into(),
    }
  }

  pub fn invalid_param(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidParam {
      name: name.into(),
      message: message.into(),
    }
  }
}
