use super::schema::Config;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

pub const ENV_PREFIX: &str = "BBR_";
pub const LEGACY_CHAIN_ENV: &str = "REQUEST_PLUGINS_CHAIN";
pub const LEGACY_METADATA_KEYS_ENV: &str = "METADATA_KEYS";

pub fn load_from_env_or_file() -> Result<Config> {
    let figment = Figment::new()
        .merge(Toml::file("body-based-router.toml"))
        .merge(Json::file("body-based-router.json"))
        .merge(Yaml::file("body-based-router.yaml"))
        .merge(Yaml::file("body-based-router.yml"));
    finish(figment)
}

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };
    if !path.exists() {
        return Err(ConfigError::Parse(format!("Config file not found: {}", path.display())).into());
    }

    finish(figment)
}

fn finish(figment: Figment) -> Result<Config> {
    let config: Config = figment
        // BBR_SERVER__PORT=9004 sets server.port
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    let config = apply_legacy_env(config);
    let config = apply_env_substitutions(config)?;
    validate(&config)?;

    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        return Err(ConfigError::Validation("Server port must be greater than 0".into()).into());
    }

    if config.admin.enabled
        && config.admin.port == config.server.port
        && config.admin.host == config.server.host
    {
        return Err(ConfigError::Validation(
            "Admin and ext_proc listeners must use different ports".into(),
        )
        .into());
    }

    if config.server.max_message_bytes == 0 {
        return Err(
            ConfigError::Validation("max_message_bytes must be greater than 0".into()).into(),
        );
    }

    config.plugins.validate()?;

    Ok(())
}

/// Structured settings win; the flat variables are only read when the
/// matching setting is unset.
fn apply_legacy_env(mut config: Config) -> Config {
    if config.plugins.request_chain.trim().is_empty() {
        if let Ok(chain) = std::env::var(LEGACY_CHAIN_ENV) {
            config.plugins.request_chain = chain;
        }
    }

    if config.plugins.metadata_keys.is_none() {
        if let Ok(keys) = std::env::var(LEGACY_METADATA_KEYS_ENV) {
            config.plugins.metadata_keys = Some(keys);
        }
    }

    config
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    for parameters in config.plugins.parameters.values_mut() {
        substitute_in_value(parameters)?;
    }

    for base in config.plugins.base_models.values_mut() {
        *base = substitute_env_vars(base)?;
    }

    Ok(config)
}

fn substitute_in_value(value: &mut serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::String(s) => *s = substitute_env_vars(s)?,
        serde_json::Value::Array(items) => {
            for item in items {
                substitute_in_value(item)?;
            }
        }
        serde_json::Value::Object(fields) => {
            for field in fields.values_mut() {
                substitute_in_value(field)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"))
}

fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();

    for cap in env_var_pattern().captures_iter(input) {
        let var_name = &cap[1];
        // ${VAR:-default}
        let (name, default) = match var_name.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (var_name, None),
        };

        match (std::env::var(name), default) {
            (Ok(value), _) => result = result.replace(&cap[0], &value),
            (Err(_), Some(default)) => result = result.replace(&cap[0], default),
            (Err(_), None) => {
                return Err(
                    ConfigError::EnvVar(format!("Environment variable '{name}' not found")).into(),
                )
            }
        }
    }

    Ok(result)
}
