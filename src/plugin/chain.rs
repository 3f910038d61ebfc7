//! Ordered plugin chains
//!
//! A chain only stores type keys. Instances live in the
//! [`PluginRegistry`] and are resolved on every request, so removing a plugin
//! from a chain never touches the registry.

use crate::plugin::registry::PluginRegistry;
use crate::plugin::schema::BbrPlugin;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("plugin type '{type_key}' is not registered")]
    PluginNotRegistered { type_key: String },

    #[error("plugin index {index} out of range for chain of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("plugin '{type_key}' not found in chain")]
    NotFoundInChain { type_key: String },

    #[error("plugin '{type_key}' at index {index} is not found in the registry")]
    PluginMissingFromRegistry { index: usize, type_key: String },
}

/// Sequence of plugin type keys executed in order for one request phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginChain {
    plugins: Vec<String>,
}

impl PluginChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `type_key`. The registry must already hold an instance of it.
    pub fn add_plugin(
        &mut self,
        type_key: &str,
        registry: &PluginRegistry,
    ) -> Result<(), ChainError> {
        ensure_registered(type_key, registry)?;
        self.plugins.push(type_key.to_string());
        Ok(())
    }

    /// Inserts `type_key` at `index`, where `index` may equal the chain length.
    pub fn add_plugin_at(
        &mut self,
        type_key: &str,
        index: usize,
        registry: &PluginRegistry,
    ) -> Result<(), ChainError> {
        if index > self.plugins.len() {
            return Err(ChainError::IndexOutOfRange {
                index,
                len: self.plugins.len(),
            });
        }
        ensure_registered(type_key, registry)?;
        self.plugins.insert(index, type_key.to_string());
        Ok(())
    }

    /// Removes the first occurrence of `type_key`.
    pub fn delete_plugin(&mut self, type_key: &str) -> Result<(), ChainError> {
        let position = self
            .plugins
            .iter()
            .position(|entry| entry == type_key)
            .ok_or_else(|| ChainError::NotFoundInChain {
                type_key: type_key.to_string(),
            })?;
        self.plugins.remove(position);
        Ok(())
    }

    /// Resolves the `index`-th entry against the registry's live instances.
    pub fn get_plugin(
        &self,
        index: usize,
        registry: &PluginRegistry,
    ) -> Result<Arc<dyn BbrPlugin>, ChainError> {
        let type_key = self
            .plugins
            .get(index)
            .ok_or(ChainError::IndexOutOfRange {
                index,
                len: self.plugins.len(),
            })?;
        registry
            .get_plugin(type_key)
            .map_err(|_| ChainError::PluginMissingFromRegistry {
                index,
                type_key: type_key.clone(),
            })
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn type_keys(&self) -> &[String] {
        &self.plugins
    }

    pub fn contains(&self, type_key: &str) -> bool {
        self.plugins.iter().any(|entry| entry == type_key)
    }
}

fn ensure_registered(type_key: &str, registry: &PluginRegistry) -> Result<(), ChainError> {
    if registry.contains_plugin(type_key) {
        Ok(())
    } else {
        Err(ChainError::PluginNotRegistered {
            type_key: type_key.to_string(),
        })
    }
}

impl fmt::Display for PluginChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginChain{{plugins={:?}}}", self.plugins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::registry::PluginFactory;
    use crate::plugin::schema::{TypedName, GUARD_RAIL_TYPE, METADATA_EXTRACTOR_TYPE, MODEL_SELECTOR_TYPE};

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

    fn registry_with(entries: &[(&'static str, &'static str)]) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        for (type_key, name) in entries {
            let (type_key, name) = (*type_key, *name);
            let factory: PluginFactory = Arc::new(move || {
                Arc::new(NamedPlugin {
                    typed_name: TypedName::new(type_key, name),
                }) as Arc<dyn BbrPlugin>
            });
            registry.register_factory(type_key, factory).unwrap();
            let plugin = registry.create_plugin(type_key).unwrap();
            registry.register_plugin(plugin).unwrap();
        }
        registry
    }

    #[test]
    fn test_add_plugin_requires_registration() {
        let registry = registry_with(&[(METADATA_EXTRACTOR_TYPE, "simple-model-extractor")]);
        let mut chain = PluginChain::new();

        assert_eq!(
            chain.add_plugin(MODEL_SELECTOR_TYPE, &registry),
            Err(ChainError::PluginNotRegistered {
                type_key: MODEL_SELECTOR_TYPE.to_string()
            })
        );
        chain.add_plugin(METADATA_EXTRACTOR_TYPE, &registry).unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_add_plugin_at_index_bounds() {
        let registry = registry_with(&[
            (METADATA_EXTRACTOR_TYPE, "simple-model-extractor"),
            (MODEL_SELECTOR_TYPE, "lora-adapter-selector"),
            (GUARD_RAIL_TYPE, "bad-words-blocker"),
        ]);
        let mut chain = PluginChain::new();

        // Inserting at len() is an append, even on an empty chain.
        chain.add_plugin_at(MODEL_SELECTOR_TYPE, 0, &registry).unwrap();
        chain.add_plugin_at(METADATA_EXTRACTOR_TYPE, 0, &registry).unwrap();
        chain.add_plugin_at(GUARD_RAIL_TYPE, 2, &registry).unwrap();
        assert_eq!(
            chain.type_keys(),
            &[METADATA_EXTRACTOR_TYPE, MODEL_SELECTOR_TYPE, GUARD_RAIL_TYPE]
        );

        assert_eq!(
            chain.add_plugin_at(GUARD_RAIL_TYPE, 4, &registry),
            Err(ChainError::IndexOutOfRange { index: 4, len: 3 })
        );
    }

    #[test]
    fn test_delete_plugin_leaves_registry_untouched() {
        let registry = registry_with(&[(METADATA_EXTRACTOR_TYPE, "simple-model-extractor")]);
        let mut chain = PluginChain::new();
        chain.add_plugin(METADATA_EXTRACTOR_TYPE, &registry).unwrap();
        chain.add_plugin(METADATA_EXTRACTOR_TYPE, &registry).unwrap();

        chain.delete_plugin(METADATA_EXTRACTOR_TYPE).unwrap();
        assert_eq!(chain.len(), 1);
        assert!(registry.contains_plugin(METADATA_EXTRACTOR_TYPE));

        chain.delete_plugin(METADATA_EXTRACTOR_TYPE).unwrap();
        assert!(chain.is_empty());
        assert_eq!(
            chain.delete_plugin(METADATA_EXTRACTOR_TYPE),
            Err(ChainError::NotFoundInChain {
                type_key: METADATA_EXTRACTOR_TYPE.to_string()
            })
        );

        chain.add_plugin(METADATA_EXTRACTOR_TYPE, &registry).unwrap();
        assert!(chain.contains(METADATA_EXTRACTOR_TYPE));
    }

    #[test]
    fn test_get_plugin_on_empty_chain() {
        let registry = registry_with(&[]);
        let chain = PluginChain::new();
        for index in [0, 1, 7, usize::MAX] {
            assert!(matches!(
                chain.get_plugin(index, &registry),
                Err(ChainError::IndexOutOfRange { len: 0, .. })
            ));
        }
    }

    #[test]
    fn test_get_plugin_missing_from_registry() {
        let mut registry = registry_with(&[(METADATA_EXTRACTOR_TYPE, "simple-model-extractor")]);
        let mut chain = PluginChain::new();
        chain.add_plugin(METADATA_EXTRACTOR_TYPE, &registry).unwrap();

        let resolved = chain.get_plugin(0, &registry).unwrap();
        assert_eq!(resolved.typed_name().name, "simple-model-extractor");

        registry.unregister_plugin(METADATA_EXTRACTOR_TYPE).unwrap();
        assert_eq!(
            chain.get_plugin(0, &registry).err(),
            Some(ChainError::PluginMissingFromRegistry {
                index: 0,
                type_key: METADATA_EXTRACTOR_TYPE.to_string()
            })
        );
    }
}
