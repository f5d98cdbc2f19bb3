use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockKind};
use crate::error::ConfigError;
use crate::variable::Variable;

/// Version written by this release.
pub const CURRENT_VERSION: &str = "2.0.0";

const LEGACY_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
  #[serde(default)]
  pub blocks: Vec<Block>,
  #[serde(default)]
  pub triggers: Vec<Block>,
}

/// A saved pipeline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineFile {
  pub version: String,
  pub name: String,
  #[serde(default)]
  pub description: String,
  pub canvas: Canvas,
  #[serde(default)]
  pub variables: Vec<Variable>,
}

impl PipelineFile {
  /// Parse a pipeline document, migrating older versions to [`CURRENT_VERSION`].
  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    let mut file: PipelineFile = serde_json::from_str(content)?;
    match file.version.as_str() {
      CURRENT_VERSION => Ok(file),
      LEGACY_VERSION => {
        file.migrate_legacy();
        Ok(file)
      }
      other => Err(ConfigError::UnsupportedVersion(other.to_string())),
    }
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_json(&content)
  }

  /// Version 1 kept triggers inline with the other blocks.
  fn migrate_legacy(&mut self) {
    let (triggers, blocks): (Vec<Block>, Vec<Block>) = std::mem::take(&mut self.canvas.blocks)
      .into_iter()
      .partition(|b| matches!(b.kind, BlockKind::Event));
    self.canvas.triggers.extend(triggers);
    self.canvas.blocks = blocks;
    self.version = CURRENT_VERSION.to_string();
  }

  /// The executable sequence: triggers first, then the canvas blocks.
  pub fn graph(&self) -> Vec<Block> {
    self
      .canvas
      .triggers
      .iter()
      .chain(&self.canvas.blocks)
      .cloned()
      .collect()
  }
}
