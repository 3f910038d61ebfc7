//! Startup assembly of the plugin registry and request chain
//!
//! Builds a frozen [`BodyRouter`] from configuration. After this point the
//! registry and chain are only read, so the router is shared behind an `Arc`
//! without locks.

use crate::datastore::Datastore;
use crate::error::ConfigError;
use crate::plugin::chain::PluginChain;
use crate::plugin::config::PluginsConfig;
use crate::plugin::registry::{PluginRegistry, RegistryError};
use crate::plugin::schema::{supported_implementations, TypedName};
use crate::plugins::builtin_factory;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry, request chain and metadata keys used for every request.
#[derive(Debug)]
pub struct BodyRouter {
    registry: PluginRegistry,
    request_chain: PluginChain,
    metadata_keys: Vec<String>,
}

impl BodyRouter {
    pub fn new(registry: PluginRegistry, request_chain: PluginChain, metadata_keys: Vec<String>) -> Self {
        Self {
            registry,
            request_chain,
            metadata_keys,
        }
    }

    /// Registers a factory and an instance for every chain entry, in order.
    ///
    /// A type may appear several times in the chain, but always with the
    /// same implementation since the registry holds one instance per type.
    pub fn from_config(
        config: &PluginsConfig,
        datastore: Arc<dyn Datastore>,
    ) -> Result<Self, ConfigError> {
        let specs = config.request_chain()?;
        let metadata_keys = config.metadata_keys();

        let mut registry = PluginRegistry::new();
        let mut request_chain = PluginChain::new();
        let mut active: HashMap<String, String> = HashMap::new();

        for spec in specs {
            let implementations = supported_implementations(&spec.type_key).ok_or_else(|| {
                RegistryError::UnsupportedInterface {
                    type_key: spec.type_key.clone(),
                }
            })?;
            if !implementations.contains(&spec.implementation.as_str()) {
                return Err(RegistryError::UnsupportedImplementation {
                    type_key: spec.type_key.clone(),
                    name: spec.implementation.clone(),
                }
                .into());
            }

            if let Some(existing) = active.get(&spec.type_key) {
                if *existing != spec.implementation {
                    return Err(ConfigError::ConflictingImplementations {
                        type_key: spec.type_key.clone(),
                        existing: existing.clone(),
                        requested: spec.implementation.clone(),
                    });
                }
                debug!(plugin_type = %spec.type_key, "Reusing registered plugin");
                request_chain.add_plugin(&spec.type_key, &registry)?;
                continue;
            }

            let factory = builtin_factory(
                &spec.implementation,
                config.parameters_for(&spec.implementation),
                datastore.clone(),
            )?
            .ok_or_else(|| ConfigError::ImplementationUnavailable {
                type_key: spec.type_key.clone(),
                implementation: spec.implementation.clone(),
            })?;

            registry.register_factory(&spec.type_key, factory)?;
            let plugin = registry.create_plugin(&spec.type_key)?;
            if plugin.typed_name().type_key != spec.type_key {
                return Err(ConfigError::TypeMismatch {
                    implementation: spec.implementation.clone(),
                    declared: plugin.typed_name().type_key.clone(),
                    configured: spec.type_key.clone(),
                });
            }
            registry.register_plugin(plugin)?;
            request_chain.add_plugin(&spec.type_key, &registry)?;
            active.insert(spec.type_key.clone(), spec.implementation.clone());

            info!(
                plugin_type = %spec.type_key,
                implementation = %spec.implementation,
                "Registered request plugin"
            );
        }

        info!(
            chain = %request_chain,
            metadata_keys = ?metadata_keys,
            "Request plugin chain ready"
        );

        Ok(Self::new(registry, request_chain, metadata_keys))
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn request_chain(&self) -> &PluginChain {
        &self.request_chain
    }

    pub fn metadata_keys(&self) -> &[String] {
        &self.metadata_keys
    }

    /// Typed names of the chain entries in execution order. Entries that no
    /// longer resolve are omitted.
    pub fn resolved_chain(&self) -> Vec<TypedName> {
        (0..self.request_chain.len())
            .filter_map(|index| self.request_chain.get_plugin(index, &self.registry).ok())
            .map(|plugin| plugin.typed_name().clone())
            .collect()
    }
}
