//! Service configuration
//!
//! Loaded with figment from a TOML, JSON or YAML file, then overridden by
//! `BBR_`-prefixed environment variables (`__` separates sections).

pub mod loader;
pub mod schema;

pub use loader::{load_from_env_or_file, load_from_path, validate};
pub use schema::{AdminConfig, Config, LoggingConfig, ServerConfig};
