//! Runtime error types.

/// Errors that end a run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
  /// The run was cancelled, either before a block started or while a runner
  /// was working.
  #[error("execution cancelled")]
  Cancelled,

  /// A runner reported an error.
  #[error("\"{node_name}\" action error: {message}")]
  NodeFailed {
    node_id: String,
    node_name: String,
    message: String,
    code: Option<String>,
  },

  /// A required parameter had no value after resolution.
  #[error("\"{node_name}\" is missing required param \"{param}\"")]
  MissingParam {
    node_id: String,
    node_name: String,
    param: String,
  },

  #[error("\"{node_name}\" condition error: {message}")]
  InvalidCondition {
    node_id: String,
    node_name: String,
    message: String,
  },

  #[error("\"{node_name}\" loop error: {message}")]
  InvalidLoop {
    node_id: String,
    node_name: String,
    message: String,
  },
}

impl RuntimeError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Cancelled)
  }

  /// Uid of the block the error is attributed to.
  pub fn node_id(&self) -> Option<&str> {
    match self {
      Self::Cancelled => None,
      Self::NodeFailed { node_id, .. }
      | Self::MissingParam { node_id, .. }
      | Self::InvalidCondition { node_id, .. }
      | Self::InvalidLoop { node_id, .. } => Some(node_id),
    }
  }

  pub fn code(&self) -> Option<&str> {
    match self {
      Self::NodeFailed { code, .. } => code.as_deref(),
      _ => None,
    }
  }
}
