use std::collections::BTreeMap;
use std::sync::Arc;

use pipewright_config::{NodeDefinition, PluginDefinition};

use crate::runner::{ActionRunner, ConditionRunner};

#[derive(Clone)]
pub enum Runner {
  Action(Arc<dyn ActionRunner>),
  Condition(Arc<dyn ConditionRunner>),
}

/// A node definition together with its implementation.
#[derive(Clone)]
pub struct NodeEntry {
  pub definition: NodeDefinition,
  pub runner: Runner,
}

/// A plugin being assembled for registration.
pub struct Plugin {
  id: String,
  name: String,
  description: String,
  nodes: BTreeMap<String, NodeEntry>,
}

impl Plugin {
  pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      description: String::new(),
      nodes: BTreeMap::new(),
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = description.into();
    self
  }

  pub fn action(mut self, definition: NodeDefinition, runner: impl ActionRunner + 'static) -> Self {
    self.nodes.insert(
      definition.id.clone(),
      NodeEntry {
        definition,
        runner: Runner::Action(Arc::new(runner)),
      },
    );
    self
  }

  pub fn condition(
    mut self,
    definition: NodeDefinition,
    runner: impl ConditionRunner + 'static,
  ) -> Self {
    self.nodes.insert(
      definition.id.clone(),
      NodeEntry {
        definition,
        runner: Runner::Condition(Arc::new(runner)),
      },
    );
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  fn definition(&self) -> PluginDefinition {
    PluginDefinition {
      id: self.id.clone(),
      name: self.name.clone(),
      description: self.description.clone(),
      nodes: self.nodes.values().map(|n| n.definition.clone()).collect(),
    }
  }
}

/// Registry of every plugin the host can run, keyed by plugin id.
#[derive(Default)]
pub struct Catalog {
  plugins: BTreeMap<String, Plugin>,
}

impl Catalog {
  pub fn new() -> Self {
    Self::default()
  }

  /// A catalog holding only the built-in `system` plugin.
  pub fn with_system() -> Self {
    let mut catalog = Self::new();
    catalog.register(crate::system::plugin());
    catalog
  }

  /// Register a plugin, replacing any plugin with the same id.
  pub fn register(&mut self, plugin: Plugin) {
    self.plugins.insert(plugin.id.clone(), plugin);
  }

  pub fn get_runner(&self, plugin_id: &str, node_id: &str) -> Option<&NodeEntry> {
    self.plugins.get(plugin_id)?.nodes.get(node_id)
  }

  /// Definitions of every plugin, without runners.
  pub fn definitions(&self) -> Vec<PluginDefinition> {
    self.plugins.values().map(Plugin::definition).collect()
  }

  pub fn len(&self) -> usize {
    self.plugins.len()
  }

  pub fn is_empty(&self) -> bool {
    self.plugins.is_empty()
  }
}
