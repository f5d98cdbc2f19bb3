use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What a node definition implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
  Action,
  Condition,
  Event,
  Loop,
}

/// Declaration of a single node parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamDefinition {
  #[serde(default)]
  pub label: String,
  /// Parameters are required unless explicitly marked otherwise.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub required: Option<bool>,
  /// Default expression shown in the editor.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<serde_json::Value>,
}

impl ParamDefinition {
  pub fn required(label: impl Into<String>) -> Self {
    Self {
      label: label.into(),
      required: None,
      value: None,
    }
  }

  pub fn optional(label: impl Into<String>) -> Self {
    Self {
      label: label.into(),
      required: Some(false),
      value: None,
    }
  }

  pub fn is_required(&self) -> bool {
    self.required != Some(false)
  }
}

/// Static description of a node published by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: String,
  pub kind: NodeKind,
  #[serde(default)]
  pub params: HashMap<String, ParamDefinition>,
  #[serde(default)]
  pub outputs: Vec<String>,
}

impl NodeDefinition {
  pub fn new(id: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      description: String::new(),
      kind,
      params: HashMap::new(),
      outputs: Vec::new(),
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = description.into();
    self
  }

  pub fn with_param(mut self, name: impl Into<String>, param: ParamDefinition) -> Self {
    self.params.insert(name.into(), param);
    self
  }

  pub fn with_output(mut self, name: impl Into<String>) -> Self {
    self.outputs.push(name.into());
    self
  }

  /// Names of required parameters missing from `provided`, sorted.
  pub fn missing_params<'a, I>(&self, provided: I) -> Vec<String>
  where
    I: IntoIterator<Item = &'a String>,
  {
    let provided: Vec<&String> = provided.into_iter().collect();
    let mut missing: Vec<String> = self
      .params
      .iter()
      .filter(|(name, def)| def.is_required() && !provided.contains(name))
      .map(|(name, _)| name.clone())
      .collect();
    missing.sort();
    missing
  }
}

/// A plugin and the nodes it provides, without their runners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDefinition {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: String,
  pub nodes: Vec<NodeDefinition>,
}

impl PluginDefinition {
  pub fn node(&self, node_id: &str) -> Option<&NodeDefinition> {
    self.nodes.iter().find(|n| n.id == node_id)
  }
}
