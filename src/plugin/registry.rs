//! Plugin factory registry
//!
//! Maps a stable class reference to a constructor. The manager stores the
//! class reference on each descriptor and builds live instances through
//! this registry.

use super::mangadex::MangaDexPlugin;
use super::schema::ConfigValues;
use super::types::{Plugin, PluginContext};
use crate::core::error::{MangoonError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Constructor for one plugin class
pub type PluginFactory =
    Arc<dyn Fn(&PluginContext, ConfigValues) -> Result<Arc<dyn Plugin>> + Send + Sync>;

/// Registry of known plugin classes
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every plugin shipped in this crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_factory(MangaDexPlugin::CLASS_REF, |context, config| {
            Ok(Arc::new(MangaDexPlugin::new(context.clone(), config)) as Arc<dyn Plugin>)
        });
        registry
    }

    /// Register (or replace) the factory for `class_ref`
    pub fn register_factory<F>(&mut self, class_ref: &str, factory: F)
    where
        F: Fn(&PluginContext, ConfigValues) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories.insert(class_ref.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, class_ref: &str) -> bool {
        self.factories.contains_key(class_ref)
    }

    /// Known class references, sorted
    pub fn class_refs(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build a new instance of `class_ref` with the given configuration
    pub fn create(
        &self,
        class_ref: &str,
        context: &PluginContext,
        config: ConfigValues,
    ) -> Result<Arc<dyn Plugin>> {
        let factory = self.factories.get(class_ref).ok_or_else(|| {
            MangoonError::PluginInstantiationError(format!("Unknown plugin class: {}", class_ref))
        })?;
        factory(context, config)
    }
}
