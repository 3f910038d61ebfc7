use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::plugin::memory::{Endpoint, SharedMemory, CHAT_COMPLETIONS_PATH};
use crate::proxy::ChainOutcome;
use crate::state::AppState;
use bytes::Bytes;
use std::path::Path;
use tracing::{error, info, warn};

/// Validates `config`, assembles the plugin chain and, when given, runs a
/// sample request body through it.
pub fn run_config_check(config: Config, sample: Option<&Path>, path: Option<&str>) -> Result<()> {
    info!("Checking configuration...");
    crate::config::validate(&config)?;
    info!("✓ Configuration is valid");

    info!(
        "ext_proc listener: {} (streaming: {})",
        config.server.address(),
        config.server.streaming
    );
    if config.admin.enabled {
        info!("Admin listener: {}", config.admin.address());
    } else {
        info!("Admin listener: DISABLED");
    }

    let (state, _shutdown_rx) = match AppState::new(config) {
        Ok(built) => built,
        Err(e) => {
            error!("✗ Plugin chain could not be built: {}", e);
            return Err(e);
        }
    };

    let router = &state.router;
    info!("✓ Request chain has {} plugin(s)", router.request_chain().len());
    for (index, plugin) in router.resolved_chain().iter().enumerate() {
        info!("  {}. {}", index + 1, plugin);
    }
    info!("Metadata keys: {:?}", router.metadata_keys());
    if !state.config.plugins.base_models.is_empty() {
        info!(
            "Base models known for {} adapter(s)",
            state.config.plugins.base_models.len()
        );
    }

    let Some(sample) = sample else {
        info!("\n✓ All checks passed");
        return Ok(());
    };

    let body = std::fs::read(sample)?;
    let path = path.unwrap_or(CHAT_COMPLETIONS_PATH);
    info!("\nRunning {} as a request to {}", sample.display(), path);

    let mut memory = SharedMemory::new();
    let outcome = state
        .handler
        .execute_chain(&Bytes::from(body), Endpoint::from_path(path), &mut memory)
        .map_err(|e| {
            error!("✗ Sample request failed: {}", e);
            crate::error::BbrError::from(e)
        })?;
    report_outcome(&outcome);

    if outcome.model().is_none() {
        warn!("! Sample body carries no model; it would be passed through");
        return Err(ConfigError::Validation("Sample request produced no model header".into()).into());
    }

    info!("\n✓ All checks passed");
    Ok(())
}

fn report_outcome(outcome: &ChainOutcome) {
    let mut headers: Vec<_> = outcome.headers.iter().collect();
    headers.sort();
    for (key, value) in headers {
        info!("  {}: {}", key, value);
    }
    info!("  body: {} bytes", outcome.body.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(chain: &str) -> Config {
        let mut config = Config::default();
        config.plugins.request_chain = chain.to_string();
        config
    }

    #[test]
    fn test_check_without_sample() {
        assert!(run_config_check(config(""), None, None).is_ok());
    }

    #[test]
    fn test_check_rejects_unavailable_plugin() {
        let err = run_config_check(config("ModelSelector:semantic-model-selector"), None, None)
            .unwrap_err();
        assert!(err.to_string().contains("semantic-model-selector"));
    }

    #[test]
    fn test_check_with_sample_body() {
        let mut sample = tempfile::NamedTempFile::new().unwrap();
        sample
            .write_all(br#"{"model":"foo","messages":[]}"#)
            .unwrap();
        assert!(run_config_check(config(""), Some(sample.path()), None).is_ok());

        let mut no_model = tempfile::NamedTempFile::new().unwrap();
        no_model.write_all(br#"{"messages":[]}"#).unwrap();
        assert!(run_config_check(config(""), Some(no_model.path()), None).is_err());
    }
}
