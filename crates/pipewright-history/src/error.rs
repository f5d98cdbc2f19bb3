/// Error type for history storage.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
  /// The requested entry was not found.
  #[error("history entry not found: {0}")]
  NotFound(String),

  #[error("failed to access {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to encode history: {0}")]
  Serialization(#[from] serde_json::Error),
}
