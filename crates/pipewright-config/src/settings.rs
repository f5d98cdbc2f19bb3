//! Application settings.
//!
//! Settings live in an optional `settings.json` inside the data directory.
//! Every field has a default, so an absent file or a partial document is fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
  /// Where build history documents are written.
  pub history_dir: Option<PathBuf>,
  /// Parent folder for per-invocation working directories.
  pub cache_folder: Option<PathBuf>,
  /// `tracing` filter directive, overridden by `RUST_LOG`.
  pub log_filter: Option<String>,
}

impl Settings {
  pub const FILE_NAME: &'static str = "settings.json";

  /// Load `{data_dir}/settings.json`, falling back to defaults when absent.
  pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
    let path = data_dir.join(Self::FILE_NAME);
    match std::fs::read_to_string(&path) {
      Ok(content) => Ok(serde_json::from_str(&content)?),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
      Err(source) => Err(ConfigError::Io {
        path: path.display().to_string(),
        source,
      }),
    }
  }

  pub fn history_dir(&self, data_dir: &Path) -> PathBuf {
    self
      .history_dir
      .clone()
      .unwrap_or_else(|| data_dir.join("build-history"))
  }

  pub fn cache_folder(&self) -> PathBuf {
    self
      .cache_folder
      .clone()
      .unwrap_or_else(|| std::env::temp_dir().join("pipewright"))
  }

  pub fn log_filter(&self) -> &str {
    self.log_filter.as_deref().unwrap_or("pipewright=info,warn")
  }
}
