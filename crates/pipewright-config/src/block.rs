use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which plugin, and which node within that plugin, implements a block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
  pub plugin_id: String,
  pub node_id: String,
}

impl Origin {
  pub fn new(plugin_id: impl Into<String>, node_id: impl Into<String>) -> Self {
    Self {
      plugin_id: plugin_id.into(),
      node_id: node_id.into(),
    }
  }
}

impl fmt::Display for Origin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}::{}", self.plugin_id, self.node_id)
  }
}

/// A raw, unevaluated parameter.
///
/// The editor stores parameters either as a bare expression string or as an
/// object carrying the editor kind next to the value:
///
/// ```json
/// { "message": "steps.fetch.outputs.body", "duration": { "editor": "simple", "value": 2000 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
  Expression(String),
  Editor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    editor: Option<String>,
    value: serde_json::Value,
  },
}

impl ParamValue {
  /// The expression text handed to the evaluator.
  ///
  /// Strings are used verbatim, any other JSON value is rendered as text
  /// (`2000` becomes `"2000"`, `true` becomes `"true"`).
  pub fn expression(&self) -> String {
    match self {
      ParamValue::Expression(expr) => expr.clone(),
      ParamValue::Editor { value, .. } => match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
      },
    }
  }
}

impl From<&str> for ParamValue {
  fn from(value: &str) -> Self {
    ParamValue::Expression(value.to_string())
  }
}

/// One unit of the pipeline tree.
///
/// Conditions and loops own their nested sequences, so a pipeline is a forest
/// of sequential blocks rather than a general graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
  pub uid: String,
  pub origin: Origin,
  /// Display name given by the user.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub disabled: bool,
  #[serde(default)]
  pub params: HashMap<String, ParamValue>,
  #[serde(flatten)]
  pub kind: BlockKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
  /// The trigger that starts a run. Carries no executable body.
  Event,
  Action,
  Condition {
    #[serde(rename = "branchTrue", default)]
    branch_true: Vec<Block>,
    #[serde(rename = "branchFalse", default)]
    branch_false: Vec<Block>,
  },
  Loop {
    #[serde(default)]
    children: Vec<Block>,
  },
  Comment {
    #[serde(default)]
    comment: String,
  },
}

impl Block {
  /// Create an enabled block with no parameters.
  pub fn new(uid: impl Into<String>, origin: Origin, kind: BlockKind) -> Self {
    Self {
      uid: uid.into(),
      origin,
      name: None,
      disabled: false,
      params: HashMap::new(),
      kind,
    }
  }

  pub fn action(uid: impl Into<String>, origin: Origin) -> Self {
    Self::new(uid, origin, BlockKind::Action)
  }

  /// Builder-style parameter insertion.
  pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
    self.params.insert(name.into(), value.into());
    self
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// User-given name, falling back to the uid.
  pub fn display_name(&self) -> &str {
    self.name.as_deref().unwrap_or(&self.uid)
  }

  pub fn disabled(mut self) -> Self {
    self.disabled = true;
    self
  }

  pub fn kind_name(&self) -> &'static str {
    match self.kind {
      BlockKind::Event => "event",
      BlockKind::Action => "action",
      BlockKind::Condition { .. } => "condition",
      BlockKind::Loop { .. } => "loop",
      BlockKind::Comment { .. } => "comment",
    }
  }

  /// Total number of blocks in this subtree, including `self`.
  pub fn count(&self) -> usize {
    1 + match &self.kind {
      BlockKind::Condition {
        branch_true,
        branch_false,
      } => branch_true.iter().chain(branch_false).map(Block::count).sum(),
      BlockKind::Loop { children } => children.iter().map(Block::count).sum(),
      _ => 0,
    }
  }
}
