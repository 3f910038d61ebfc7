use std::io;
use thiserror::Error;

use crate::plugin::chain::ChainError;
use crate::plugin::registry::RegistryError;
use crate::plugin::schema::{PluginError, TypedName};

#[derive(Error, Debug)]
pub enum BbrError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while loading configuration or assembling the plugin engine.
///
/// Every variant is fatal: the process must not start serving.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),

    #[error("Malformed plugin definition on line {line_number}: '{line}'")]
    MalformedChain { line_number: usize, line: String },

    #[error("No built-in implementation '{implementation}' for plugin type '{type_key}'")]
    ImplementationUnavailable {
        type_key: String,
        implementation: String,
    },

    #[error(
        "Plugin type '{type_key}' is configured with both '{existing}' and '{requested}'; \
         only one implementation per type can be active"
    )]
    ConflictingImplementations {
        type_key: String,
        existing: String,
        requested: String,
    },

    #[error("Implementation '{implementation}' declares type '{declared}' but was configured as '{configured}'")]
    TypeMismatch {
        implementation: String,
        declared: String,
        configured: String,
    },

    #[error("Invalid parameters for plugin '{implementation}': {reason}")]
    PluginParameters {
        implementation: String,
        reason: String,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind listener on {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
}

/// Failures that abort processing of a single request.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Request body could not be parsed: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("Streamed request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Model selector {plugin} returned an empty body")]
    ProtocolViolation { plugin: TypedName },

    #[error("Plugin {plugin} failed: {source}")]
    Plugin {
        plugin: TypedName,
        #[source]
        source: PluginError,
    },
}

impl RequestError {
    /// Wraps a plugin failure, promoting body parse errors to `MalformedBody`.
    pub fn from_plugin(plugin: &TypedName, error: PluginError) -> Self {
        match error {
            PluginError::MalformedBody(source) => RequestError::MalformedBody(source),
            other => RequestError::Plugin {
                plugin: plugin.clone(),
                source: other,
            },
        }
    }

    pub fn is_malformed_body(&self) -> bool {
        matches!(self, RequestError::MalformedBody(_))
    }
}

pub type Result<T> = std::result::Result<T, BbrError>;
