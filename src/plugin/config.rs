//! Plugin configuration types and parsing
//!
//! Chains are defined in a line-oriented format, one plugin per line as
//! `CapabilityType:ImplementationName`. Blank lines and lines starting with
//! `#` are ignored.

use crate::error::ConfigError;
use crate::plugin::schema::METADATA_EXTRACTOR_TYPE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_PLUGIN_TYPE: &str = METADATA_EXTRACTOR_TYPE;
pub const DEFAULT_PLUGIN_IMPLEMENTATION: &str = "simple-model-extractor";
pub const DEFAULT_METADATA_KEY: &str = "model";

/// One parsed chain entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub type_key: String,
    pub implementation: String,
}

impl PluginSpec {
    pub fn new(type_key: impl Into<String>, implementation: impl Into<String>) -> Self {
        Self {
            type_key: type_key.into(),
            implementation: implementation.into(),
        }
    }

    pub fn default_extractor() -> Self {
        Self::new(DEFAULT_PLUGIN_TYPE, DEFAULT_PLUGIN_IMPLEMENTATION)
    }
}

/// Plugin section of the service configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PluginsConfig {
    /// Request chain definition in the line format
    #[serde(default)]
    pub request_chain: String,

    /// Comma-separated body fields metadata extractors should consider
    #[serde(default)]
    pub metadata_keys: Option<String>,

    /// JSON parameters keyed by implementation name
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,

    /// Adapter name to base model name
    #[serde(default)]
    pub base_models: HashMap<String, String>,
}

impl PluginsConfig {
    /// Parsed request chain. An empty definition yields the default
    /// extractor.
    pub fn request_chain(&self) -> Result<Vec<PluginSpec>, ConfigError> {
        let specs = parse_chain_definition(&self.request_chain)?;
        if specs.is_empty() {
            return Ok(vec![PluginSpec::default_extractor()]);
        }
        Ok(specs)
    }

    pub fn metadata_keys(&self) -> Vec<String> {
        parse_metadata_keys(self.metadata_keys.as_deref())
    }

    pub fn parameters_for(&self, implementation: &str) -> Option<&serde_json::Value> {
        self.parameters.get(implementation)
    }

    /// Validate plugin configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_chain_definition(&self.request_chain)?;

        for (implementation, parameters) in &self.parameters {
            if !parameters.is_object() {
                return Err(ConfigError::PluginParameters {
                    implementation: implementation.clone(),
                    reason: "parameters must be a JSON object".to_string(),
                });
            }
        }

        for (model, base) in &self.base_models {
            if model.trim().is_empty() || base.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "base_models entries must have non-empty names".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Parses a chain definition. Returns an empty list for an empty definition.
pub fn parse_chain_definition(definition: &str) -> Result<Vec<PluginSpec>, ConfigError> {
    let mut specs = Vec::new();

    for (index, raw_line) in definition.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let malformed = || ConfigError::MalformedChain {
            line_number: index + 1,
            line: line.to_string(),
        };

        let (type_key, implementation) = line.split_once(':').ok_or_else(malformed)?;
        let (type_key, implementation) = (type_key.trim(), implementation.trim());
        if type_key.is_empty() || implementation.is_empty() {
            return Err(malformed());
        }

        specs.push(PluginSpec::new(type_key, implementation));
    }

    Ok(specs)
}

/// Splits a comma-separated key list, trimming entries and dropping empty
/// ones. Defaults to `["model"]` when unset or empty.
pub fn parse_metadata_keys(raw: Option<&str>) -> Vec<String> {
    let keys: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect();

    if keys.is_empty() {
        vec![DEFAULT_METADATA_KEY.to_string()]
    } else {
        keys
    }
}
