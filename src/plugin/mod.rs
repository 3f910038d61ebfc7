//! Plugin engine for body-based routing
//!
//! Plugins inspect an LLM request body and produce headers the proxy routes
//! on. Some may also rewrite the body.
//!
//! # Modules
//!
//! - `schema`: capability traits, typed names and the supported-interface table
//! - `registry`: factories and the single live instance per plugin type
//! - `chain`: ordered type keys executed for a request
//! - `memory`: request-scoped parse cache shared by the chain
//! - `config`: chain definition parsing and plugin settings
//! - `init`: assembles the registry and chain at startup

pub mod chain;
pub mod config;
pub mod init;
pub mod memory;
pub mod registry;
pub mod schema;

pub use chain::{ChainError, PluginChain};
pub use config::{PluginSpec, PluginsConfig};
pub use init::BodyRouter;
pub use memory::{Endpoint, ParsedBody, SharedMemory};
pub use registry::{PluginFactory, PluginRegistry, RegistryError};
pub use schema::{
    BbrPlugin, Capability, Headers, MetadataExtractor, ModelSelector, PluginError, Selection,
    TypedName,
};
