#![forbid(unsafe_code)]

use crate::error::EngineError;
use fl_core::diff::DiffPlugin;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Statically-typed capability registry: the host registers concrete diff
/// plugin implementations at startup, keyed by schema identifier. No runtime
/// code loading.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn DiffPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn DiffPlugin>) -> Result<(), EngineError> {
        let schema_key = plugin.schema_key().to_string();
        if self.plugins.contains_key(&schema_key) {
            return Err(EngineError::DuplicateSchema(schema_key));
        }
        self.plugins.insert(schema_key, plugin);
        Ok(())
    }

    pub fn get(&self, schema_key: &str) -> Option<Arc<dyn DiffPlugin>> {
        self.plugins.get(schema_key).cloned()
    }

    pub fn schema_keys(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    /// Entity types declared by the plugin registered under `schema_key`.
    pub fn entity_types(&self, schema_key: &str) -> Option<Vec<String>> {
        self.plugins
            .get(schema_key)
            .map(|plugin| plugin.entity_types())
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("schema_keys", &self.schema_keys())
            .finish()
    }
}
