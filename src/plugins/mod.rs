//! Built-in plugin implementations
//!
//! - `simple_model_extractor`: model name to `X-Gateway-Model-Name`
//! - `body_field_to_header`: arbitrary body fields to headers
//! - `model_to_header`: model name plus its base model from the datastore
//! - `lora_adapter_selector`: splits `<base>/.../lora/<adapter>` model names

pub mod body_field_to_header;
pub mod lora_adapter_selector;
pub mod model_to_header;
pub mod simple_model_extractor;

pub use body_field_to_header::BodyFieldToHeader;
pub use lora_adapter_selector::LoraAdapterSelector;
pub use model_to_header::ModelToHeader;
pub use simple_model_extractor::SimpleModelExtractor;

use crate::datastore::Datastore;
use crate::error::ConfigError;
use crate::plugin::memory::ParsedBody;
use crate::plugin::registry::PluginFactory;
use crate::plugin::schema::{BbrPlugin, PluginError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

/// Returns a factory for a built-in implementation, validating its
/// parameters up front so construction itself cannot fail.
pub fn builtin_factory(
    implementation: &str,
    parameters: Option<&serde_json::Value>,
    datastore: Arc<dyn Datastore>,
) -> Result<Option<PluginFactory>, ConfigError> {
    let factory: PluginFactory = match implementation {
        simple_model_extractor::NAME => {
            Arc::new(|| Arc::new(SimpleModelExtractor::new()) as Arc<dyn BbrPlugin>)
        }
        body_field_to_header::NAME => {
            let parameters = parameters
                .map(|raw| decode_parameters(implementation, raw))
                .transpose()?;
            let plugin = BodyFieldToHeader::from_parameters(parameters).map_err(|reason| {
                ConfigError::PluginParameters {
                    implementation: implementation.to_string(),
                    reason,
                }
            })?;
            Arc::new(move || Arc::new(plugin.clone()) as Arc<dyn BbrPlugin>)
        }
        model_to_header::NAME => Arc::new(move || {
            Arc::new(ModelToHeader::new().with_datastore(datastore.clone())) as Arc<dyn BbrPlugin>
        }),
        lora_adapter_selector::NAME => {
            let parameters: lora_adapter_selector::LoraAdapterParameters = parameters
                .map(|raw| decode_parameters(implementation, raw))
                .transpose()?
                .unwrap_or_default();
            let plugin = LoraAdapterSelector::from_parameters(parameters).map_err(|reason| {
                ConfigError::PluginParameters {
                    implementation: implementation.to_string(),
                    reason,
                }
            })?;
            Arc::new(move || Arc::new(plugin.clone()) as Arc<dyn BbrPlugin>)
        }
        _ => return Ok(None),
    };
    Ok(Some(factory))
}

fn decode_parameters<T: DeserializeOwned>(
    implementation: &str,
    raw: &serde_json::Value,
) -> Result<T, ConfigError> {
    serde_json::from_value(raw.clone()).map_err(|e| ConfigError::PluginParameters {
        implementation: implementation.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Deserialize)]
struct ModelField {
    #[serde(default)]
    model: Option<String>,
}

/// Model name from the shared parse when present, otherwise from a
/// localized decode of the `model` field. Empty when the body names no model.
pub(crate) fn model_from_body(
    body: &[u8],
    shared: Option<ParsedBody<'_>>,
) -> Result<String, PluginError> {
    if let Some(model) = shared.map(|parsed| parsed.model()).filter(|m| !m.is_empty()) {
        return Ok(model.to_string());
    }
    let field: ModelField = serde_json::from_slice(body)?;
    Ok(field.model.unwrap_or_default())
}

/// Like [`model_from_body`], but a `model` that is not a string reads as
/// absent instead of failing. The body must still be a JSON object.
pub(crate) fn string_model_from_body(
    body: &[u8],
    shared: Option<ParsedBody<'_>>,
) -> Result<String, PluginError> {
    if let Some(model) = shared.map(|parsed| parsed.model()).filter(|m| !m.is_empty()) {
        return Ok(model.to_string());
    }
    let fields: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(body)?;
    Ok(fields
        .get("model")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string())
}
