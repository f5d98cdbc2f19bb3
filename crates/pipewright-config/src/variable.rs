use serde::{Deserialize, Serialize};

/// A user-declared variable, set before a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(flatten)]
  pub value: VariableValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableValue {
  String {
    value: String,
  },
  Boolean {
    value: bool,
  },
  Array {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    of: Option<String>,
    value: Vec<serde_json::Value>,
  },
}

impl Variable {
  pub fn string(id: impl Into<String>, value: impl Into<String>) -> Self {
    let id = id.into();
    Self {
      name: id.clone(),
      id,
      description: String::new(),
      value: VariableValue::String {
        value: value.into(),
      },
    }
  }

  pub fn to_json(&self) -> serde_json::Value {
    match &self.value {
      VariableValue::String { value } => serde_json::Value::String(value.clone()),
      VariableValue::Boolean { value } => serde_json::Value::Bool(*value),
      VariableValue::Array { value, .. } => serde_json::Value::Array(value.clone()),
    }
  }
}

/// Flatten declared variables into the `id -> value` map seen by expressions.
pub fn format_variables(variables: &[Variable]) -> serde_json::Map<String, serde_json::Value> {
  variables
    .iter()
    .map(|v| (v.id.clone(), v.to_json()))
    .collect()
}
