use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Outputs produced by one block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutputs {
  pub outputs: Map<String, Value>,
}

/// Run-scoped map from block uid to the outputs it last produced.
///
/// Serializes as `{ "<uid>": { "outputs": { ... } } }`, which is also the shape
/// expressions see under `steps`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepTable(BTreeMap<String, StepOutputs>);

impl StepTable {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record the outputs of `uid`, replacing any earlier entry.
  pub fn record(&mut self, uid: impl Into<String>, outputs: Map<String, Value>) {
    self.0.insert(uid.into(), StepOutputs { outputs });
  }

  pub fn get(&self, uid: &str) -> Option<&StepOutputs> {
    self.0.get(uid)
  }

  pub fn output(&self, uid: &str, key: &str) -> Option<&Value> {
    self.0.get(uid).and_then(|s| s.outputs.get(key))
  }

  pub fn contains(&self, uid: &str) -> bool {
    self.0.contains_key(uid)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &StepOutputs)> {
    self.0.iter()
  }
}

/// One active loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopFrame {
  pub uid: String,
  pub index: usize,
  pub value: Value,
}

/// Loop-scoped values, visible only to the children of the loops on the stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopContext {
  frames: Vec<LoopFrame>,
}

impl LoopContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// A copy of this context with one more (innermost) iteration pushed.
  pub fn enter(&self, uid: impl Into<String>, index: usize, value: Value) -> Self {
    let mut frames = self.frames.clone();
    frames.push(LoopFrame {
      uid: uid.into(),
      index,
      value,
    });
    Self { frames }
  }

  pub fn innermost(&self) -> Option<&LoopFrame> {
    self.frames.last()
  }

  pub fn depth(&self) -> usize {
    self.frames.len()
  }

  /// The `context` binding: `loopindex`/`loopvalue` of the innermost loop plus
  /// `loops.<uid>` for every enclosing loop. Empty outside of loops.
  pub fn to_json(&self) -> Value {
    let Some(inner) = self.frames.last() else {
      return json!({});
    };
    let loops: Map<String, Value> = self
      .frames
      .iter()
      .map(|f| (f.uid.clone(), json!({ "index": f.index, "value": f.value })))
      .collect();
    json!({
      "loopindex": inner.index,
      "loopvalue": inner.value,
      "loops": loops,
    })
  }
}

/// Read-only view handed to the evaluator.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
  pub steps: &'a StepTable,
  pub variables: &'a Map<String, Value>,
  pub loop_context: &'a LoopContext,
}

impl<'a> EvalContext<'a> {
  pub fn new(
    steps: &'a StepTable,
    variables: &'a Map<String, Value>,
    loop_context: &'a LoopContext,
  ) -> Self {
    Self {
      steps,
      variables,
      loop_context,
    }
  }

  pub(crate) fn to_value(self) -> minijinja::Value {
    minijinja::context! {
      steps => minijinja::Value::from_serialize(self.steps),
      variables => minijinja::Value::from_serialize(self.variables),
      context => minijinja::Value::from_serialize(self.loop_context.to_json()),
      params => minijinja::Value::from_serialize(json!({})),
    }
  }
}
