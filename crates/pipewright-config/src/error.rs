use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid JSON: {0}")]
  Json(#[from] serde_json::Error),

  #[error("unsupported pipeline version: {0}")]
  UnsupportedVersion(String),
}
