use crate::plugin::memory::ParsedBody;
use crate::plugin::schema::{
    BbrPlugin, Capability, Headers, ModelSelector, PluginError, Selection, TypedName,
    MODEL_HEADER, MODEL_SELECTOR_TYPE,
};
use crate::plugins::string_model_from_body;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

pub const NAME: &str = "lora-adapter-selector";
pub const DEFAULT_LORA_TAG: &str = "lora";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoraAdapterParameters {
    #[serde(default = "default_lora_tag")]
    pub lora_tag: String,
}

fn default_lora_tag() -> String {
    DEFAULT_LORA_TAG.to_string()
}

impl Default for LoraAdapterParameters {
    fn default() -> Self {
        Self {
            lora_tag: default_lora_tag(),
        }
    }
}

/// Routes adapter requests to the pool serving their base model.
///
/// A model named `<base>/<lora_tag>/<adapter>` is routed on `<base>` while
/// the body sent upstream names only `<adapter>`, which is how the serving
/// engine knows the adapter. Other models pass through unchanged.
#[derive(Debug, Clone)]
pub struct LoraAdapterSelector {
    typed_name: TypedName,
    lora_tag: String,
}

impl LoraAdapterSelector {
    pub fn new() -> Self {
        Self {
            typed_name: TypedName::new(MODEL_SELECTOR_TYPE, NAME),
            lora_tag: default_lora_tag(),
        }
    }

    pub fn from_parameters(parameters: LoraAdapterParameters) -> Result<Self, String> {
        let lora_tag = parameters.lora_tag.trim().to_string();
        if lora_tag.is_empty() || lora_tag.contains('/') {
            return Err(format!(
                "lora_tag must be a single non-empty path segment, got '{}'",
                parameters.lora_tag
            ));
        }
        Ok(Self {
            typed_name: TypedName::new(MODEL_SELECTOR_TYPE, NAME),
            lora_tag,
        })
    }

    pub fn lora_tag(&self) -> &str {
        &self.lora_tag
    }

    /// Splits `model` into `(base, adapter)` around the first path segment
    /// equal to the tag. Both sides must be non-empty.
    pub fn split_model(&self, model: &str) -> Option<(String, String)> {
        let segments: Vec<&str> = model.split('/').collect();
        let position = segments
            .iter()
            .position(|segment| *segment == self.lora_tag)?;

        let base = segments[..position].join("/");
        let adapter = segments[position + 1..].join("/");
        if base.is_empty() || adapter.is_empty() {
            return None;
        }
        Some((base, adapter))
    }
}

impl Default for LoraAdapterSelector {
    fn default() -> Self {
        Self::new()
    }
}

fn rewrite_model(body: &[u8], adapter: &str) -> Result<Bytes, PluginError> {
    let mut fields: Map<String, Value> = serde_json::from_slice(body)?;
    fields.insert("model".to_string(), Value::String(adapter.to_string()));
    serde_json::to_vec(&fields)
        .map(Bytes::from)
        .map_err(|e| PluginError::EncodeFailed {
            reason: e.to_string(),
        })
}

impl BbrPlugin for LoraAdapterSelector {
    fn typed_name(&self) -> &TypedName {
        &self.typed_name
    }

    fn requires_full_parsing(&self) -> bool {
        true
    }

    fn capability(&self) -> Capability<'_> {
        Capability::ModelSelector(self)
    }
}

impl ModelSelector for LoraAdapterSelector {
    fn select(&self, body: &Bytes, shared: Option<ParsedBody<'_>>) -> Result<Selection, PluginError> {
        let model = string_model_from_body(body, shared)?;
        let mut headers = Headers::new();
        if model.is_empty() {
            return Ok(Selection::unchanged(headers, body));
        }

        match self.split_model(&model) {
            Some((base, adapter)) => {
                debug!(model = %model, base = %base, adapter = %adapter, "Rewriting adapter model");
                let rewritten = rewrite_model(body, &adapter)?;
                headers.insert(MODEL_HEADER.to_string(), base);
                Ok(Selection {
                    headers,
                    body: rewritten,
                })
            }
            None => {
                headers.insert(MODEL_HEADER.to_string(), model);
                Ok(Selection::unchanged(headers, body))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::memory::SharedMemory;

    #[test]
    fn test_split_model() {
        let selector = LoraAdapterSelector::new();
        assert_eq!(
            selector.split_model("meta-llama/Llama-3.1-8B/lora/sql-adapter"),
            Some(("meta-llama/Llama-3.1-8B".to_string(), "sql-adapter".to_string()))
        );
        assert_eq!(
            selector.split_model("family/model/lora/team/adapter"),
            Some(("family/model".to_string(), "team/adapter".to_string()))
        );
        assert_eq!(selector.split_model("meta-llama/Llama-3.1-8B"), None);
        assert_eq!(selector.split_model("lora/adapter"), None);
        assert_eq!(selector.split_model("base/lora/"), None);
        // The tag has to be a whole segment.
        assert_eq!(selector.split_model("explorative/model/x"), None);
    }

    #[test]
    fn test_rewrites_adapter_model() {
        let selector = LoraAdapterSelector::new();
        let body = Bytes::from_static(
            br#"{"model":"meta-llama/Llama-3.1-8B/lora/sql-adapter","prompt":"select","max_tokens":5}"#,
        );

        let mut memory = SharedMemory::new();
        memory.parse_completion(&body).unwrap();
        let selection = selector
            .select(&body, memory.completion().map(ParsedBody::Completion))
            .unwrap();

        assert_eq!(selection.headers[MODEL_HEADER], "meta-llama/Llama-3.1-8B");
        let rewritten: Value = serde_json::from_slice(&selection.body).unwrap();
        assert_eq!(rewritten["model"], "sql-adapter");
        assert_eq!(rewritten["prompt"], "select");
        assert_eq!(rewritten["max_tokens"], 5);
    }

    #[test]
    fn test_plain_model_echoes_body() {
        let selector = LoraAdapterSelector::new();
        let body = Bytes::from_static(br#"{"model":"foo","prompt":"hi"}"#);

        let selection = selector.select(&body, None).unwrap();
        assert_eq!(selection.headers[MODEL_HEADER], "foo");
        assert_eq!(selection.body, body);
    }

    #[test]
    fn test_missing_model_echoes_body_without_headers() {
        let selector = LoraAdapterSelector::new();
        let body = Bytes::from_static(br#"{"prompt":"hi"}"#);

        let selection = selector.select(&body, None).unwrap();
        assert!(selection.headers.is_empty());
        assert_eq!(selection.body, body);
    }

    #[test]
    fn test_custom_tag() {
        let selector = LoraAdapterSelector::from_parameters(LoraAdapterParameters {
            lora_tag: "adapters".to_string(),
        })
        .unwrap();
        assert_eq!(
            selector.split_model("base/adapters/a1"),
            Some(("base".to_string(), "a1".to_string()))
        );
        assert_eq!(selector.split_model("base/lora/a1"), None);

        for bad in ["", "  ", "a/b"] {
            assert!(LoraAdapterSelector::from_parameters(LoraAdapterParameters {
                lora_tag: bad.to_string(),
            })
            .is_err());
        }
    }
}
