//! Plugin factories and live plugin instances
//!
//! The registry holds at most one live instance per plugin type. Chains refer
//! to plugins by type key and resolve them here on every request, so the
//! registry is built during startup and only read afterwards.

use crate::plugin::schema::{supported_implementations, BbrPlugin};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Zero-argument constructor for a plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn BbrPlugin> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("non-supported plugin interface type '{type_key}'")]
    UnsupportedInterface { type_key: String },

    #[error("implementation '{name}' is not supported for plugin interface type '{type_key}'")]
    UnsupportedImplementation { type_key: String, name: String },

    #[error("no plugin factory registered for plugin interface type '{type_key}'")]
    FactoryNotRegistered { type_key: String },

    #[error("no plugin factory found for '{type_key}'")]
    FactoryNotFound { type_key: String },

    #[error("plugin type '{type_key}' not found")]
    NotFound { type_key: String },
}

#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
    plugins: HashMap<String, Arc<dyn BbrPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the factory for a supported plugin type.
    pub fn register_factory(
        &mut self,
        type_key: &str,
        factory: PluginFactory,
    ) -> Result<(), RegistryError> {
        if supported_implementations(type_key).is_none() {
            return Err(RegistryError::UnsupportedInterface {
                type_key: type_key.to_string(),
            });
        }
        self.factories.insert(type_key.to_string(), factory);
        Ok(())
    }

    /// Registers a plugin instance under its type, replacing any previous
    /// instance of that type.
    ///
    /// The factory for the type must already be registered.
    pub fn register_plugin(&mut self, plugin: Arc<dyn BbrPlugin>) -> Result<(), RegistryError> {
        let typed_name = plugin.typed_name();
        let implementations = supported_implementations(&typed_name.type_key).ok_or_else(|| {
            RegistryError::UnsupportedInterface {
                type_key: typed_name.type_key.clone(),
            }
        })?;

        if !implementations.contains(&typed_name.name.as_str()) {
            return Err(RegistryError::UnsupportedImplementation {
                type_key: typed_name.type_key.clone(),
                name: typed_name.name.clone(),
            });
        }

        if !self.factories.contains_key(&typed_name.type_key) {
            return Err(RegistryError::FactoryNotRegistered {
                type_key: typed_name.type_key.clone(),
            });
        }

        let type_key = typed_name.type_key.clone();
        self.plugins.insert(type_key, plugin);
        Ok(())
    }

    pub fn get_factory(&self, type_key: &str) -> Result<PluginFactory, RegistryError> {
        self.factories
            .get(type_key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                type_key: type_key.to_string(),
            })
    }

    pub fn get_plugin(&self, type_key: &str) -> Result<Arc<dyn BbrPlugin>, RegistryError> {
        self.plugins
            .get(type_key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                type_key: type_key.to_string(),
            })
    }

    /// Builds a fresh instance through the registered factory. The instance
    /// is not registered.
    pub fn create_plugin(&self, type_key: &str) -> Result<Arc<dyn BbrPlugin>, RegistryError> {
        let factory = self
            .factories
            .get(type_key)
            .ok_or_else(|| RegistryError::FactoryNotFound {
                type_key: type_key.to_string(),
            })?;
        Ok(factory())
    }

    pub fn unregister_factory(&mut self, type_key: &str) -> Result<(), RegistryError> {
        self.factories
            .remove(type_key)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound {
                type_key: type_key.to_string(),
            })
    }

    pub fn unregister_plugin(&mut self, type_key: &str) -> Result<(), RegistryError> {
        self.plugins
            .remove(type_key)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound {
                type_key: type_key.to_string(),
            })
    }

    pub fn list_plugins(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    pub fn list_factories(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn contains_factory(&self, type_key: &str) -> bool {
        self.factories.contains_key(type_key)
    }

    pub fn contains_plugin(&self, type_key: &str) -> bool {
        self.plugins.contains_key(type_key)
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Drops every factory and instance. Only meant for re-initialisation.
    pub fn clear(&mut self) {
        self.factories.clear();
        self.plugins.clear();
    }
}

impl fmt::Display for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut plugins: Vec<String> = self
            .plugins
            .values()
            .map(|plugin| plugin.typed_name().to_string())
            .collect();
        plugins.sort();
        let mut factories = self.list_factories();
        factories.sort();
        write!(
            f,
            "PluginRegistry{{plugins={plugins:?}, factories={factories:?}}}"
        )
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::schema::{TypedName, METADATA_EXTRACTOR_TYPE, MODEL_SELECTOR_TYPE};

    struct NamedPlugin {
        typed_name: TypedName,
    }

    impl BbrPlugin for NamedPlugin {
        fn typed_name(&self) -> &TypedName {
            &self.typed_name
        }

        fn requires_full_parsing(&self) -> bool {
            false
        }
    }

    fn plugin(type_key: &str, name: &str) -> Arc<dyn BbrPlugin> {
        Arc::new(NamedPlugin {
            typed_name: TypedName::new(type_key, name),
        })
    }

    fn factory(type_key: &'static str, name: &'static str) -> PluginFactory {
        Arc::new(move || plugin(type_key, name))
    }

    #[test]
    fn test_register_factory_rejects_unsupported_type() {
        let mut registry = PluginRegistry::new();
        let err = registry
            .register_factory("Scorer", factory("Scorer", "x"))
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::UnsupportedInterface {
                type_key: "Scorer".to_string()
            }
        );
        assert!(registry.list_factories().is_empty());
    }

    #[test]
    fn test_register_plugin_requires_factory_first() {
        let mut registry = PluginRegistry::new();
        let err = registry
            .register_plugin(plugin(METADATA_EXTRACTOR_TYPE, "simple-model-extractor"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::FactoryNotRegistered { .. }));
        assert!(registry.list_plugins().is_empty());

        registry
            .register_factory(
                METADATA_EXTRACTOR_TYPE,
                factory(METADATA_EXTRACTOR_TYPE, "simple-model-extractor"),
            )
            .unwrap();
        registry
            .register_plugin(plugin(METADATA_EXTRACTOR_TYPE, "simple-model-extractor"))
            .unwrap();
        assert!(registry.contains_plugin(METADATA_EXTRACTOR_TYPE));
    }

    #[test]
    fn test_register_plugin_rejects_unknown_implementation() {
        let mut registry = PluginRegistry::new();
        registry
            .register_factory(
                MODEL_SELECTOR_TYPE,
                factory(MODEL_SELECTOR_TYPE, "lora-adapter-selector"),
            )
            .unwrap();

        let err = registry
            .register_plugin(plugin(MODEL_SELECTOR_TYPE, "round-robin-selector"))
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::UnsupportedImplementation { ref name, .. } if name == "round-robin-selector"
        ));
        assert!(!registry.contains_plugin(MODEL_SELECTOR_TYPE));
    }

    #[test]
    fn test_register_plugin_replaces_instance_of_same_type() {
        let mut registry = PluginRegistry::new();
        registry
            .register_factory(
                METADATA_EXTRACTOR_TYPE,
                factory(METADATA_EXTRACTOR_TYPE, "simple-model-extractor"),
            )
            .unwrap();
        registry
            .register_plugin(plugin(METADATA_EXTRACTOR_TYPE, "simple-model-extractor"))
            .unwrap();
        registry
            .register_plugin(plugin(METADATA_EXTRACTOR_TYPE, "model-to-header"))
            .unwrap();

        assert_eq!(registry.plugin_count(), 1);
        let live = registry.get_plugin(METADATA_EXTRACTOR_TYPE).unwrap();
        assert_eq!(live.typed_name().name, "model-to-header");
    }

    #[test]
    fn test_create_plugin_uses_factory() {
        let mut registry = PluginRegistry::new();
        assert!(matches!(
            registry.create_plugin(MODEL_SELECTOR_TYPE),
            Err(RegistryError::FactoryNotFound { .. })
        ));

        registry
            .register_factory(
                MODEL_SELECTOR_TYPE,
                factory(MODEL_SELECTOR_TYPE, "lora-adapter-selector"),
            )
            .unwrap();
        let created = registry.create_plugin(MODEL_SELECTOR_TYPE).unwrap();
        assert_eq!(created.typed_name().name, "lora-adapter-selector");
        // Creating does not register.
        assert!(!registry.contains_plugin(MODEL_SELECTOR_TYPE));
    }

    #[test]
    fn test_unregister_and_clear() {
        let mut registry = PluginRegistry::new();
        assert!(matches!(
            registry.unregister_plugin(METADATA_EXTRACTOR_TYPE),
            Err(RegistryError::NotFound { .. })
        ));
        assert!(matches!(
            registry.unregister_factory(METADATA_EXTRACTOR_TYPE),
            Err(RegistryError::NotFound { .. })
        ));

        registry
            .register_factory(
                METADATA_EXTRACTOR_TYPE,
                factory(METADATA_EXTRACTOR_TYPE, "simple-model-extractor"),
            )
            .unwrap();
        registry
            .register_plugin(plugin(METADATA_EXTRACTOR_TYPE, "simple-model-extractor"))
            .unwrap();

        registry.unregister_plugin(METADATA_EXTRACTOR_TYPE).unwrap();
        assert!(registry.get_plugin(METADATA_EXTRACTOR_TYPE).is_err());
        assert!(registry.get_factory(METADATA_EXTRACTOR_TYPE).is_ok());

        registry.clear();
        assert!(registry.list_factories().is_empty());
        assert!(registry.list_plugins().is_empty());
    }

    #[test]
    fn test_display_lists_typed_names() {
        let mut registry = PluginRegistry::new();
        registry
            .register_factory(
                METADATA_EXTRACTOR_TYPE,
                factory(METADATA_EXTRACTOR_TYPE, "simple-model-extractor"),
            )
            .unwrap();
        registry
            .register_plugin(plugin(METADATA_EXTRACTOR_TYPE, "simple-model-extractor"))
            .unwrap();

        let rendered = registry.to_string();
        assert!(rendered.contains("MetadataExtractor/simple-model-extractor"));
    }
}
