use crate::plugin::memory::ParsedBody;
use crate::plugin::schema::{
    BbrPlugin, Capability, Headers, MetadataExtractor, PluginError, TypedName,
    METADATA_EXTRACTOR_TYPE, MODEL_HEADER,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const NAME: &str = "body-field-to-header";

const HEADER_PREFIX: &str = "X-Gateway-";

/// Parameters accepted by [`BodyFieldToHeader`].
///
/// `headers` maps header names to body fields. `field_name` with an optional
/// `header_name` adds a single mapping on top.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BodyFieldParameters {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub field_name: Option<String>,
    #[serde(default)]
    pub header_name: Option<String>,
}

/// Copies top-level body fields into request headers.
///
/// Without parameters the configured metadata keys drive the mapping.
#[derive(Debug, Clone)]
pub struct BodyFieldToHeader {
    typed_name: TypedName,
    // (header, field), sorted by header
    mappings: Vec<(String, String)>,
}

impl BodyFieldToHeader {
    /// Plugin driven by metadata keys.
    pub fn new() -> Self {
        Self {
            typed_name: TypedName::new(METADATA_EXTRACTOR_TYPE, NAME),
            mappings: Vec::new(),
        }
    }

    pub fn from_parameters(parameters: Option<BodyFieldParameters>) -> Result<Self, String> {
        let Some(parameters) = parameters else {
            return Ok(Self::new());
        };

        let mut mappings: BTreeMap<String, String> = BTreeMap::new();
        for (header, field) in parameters.headers {
            let (header, field) = (header.trim().to_string(), field.trim().to_string());
            if header.is_empty() || field.is_empty() {
                return Err("header and field names must not be empty".to_string());
            }
            mappings.insert(header, field);
        }

        match (parameters.field_name, parameters.header_name) {
            (Some(field), header) => {
                let field = field.trim().to_string();
                if field.is_empty() {
                    return Err("field_name must not be empty".to_string());
                }
                let header = header
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| default_header_for(&field));
                mappings.insert(header, field);
            }
            (None, Some(_)) => return Err("header_name requires field_name".to_string()),
            (None, None) => {}
        }

        if mappings.is_empty() {
            return Err("at least one field to header mapping is required".to_string());
        }

        Ok(Self {
            typed_name: TypedName::new(METADATA_EXTRACTOR_TYPE, NAME),
            mappings: mappings.into_iter().collect(),
        })
    }

    pub fn mappings(&self) -> &[(String, String)] {
        &self.mappings
    }
}

impl Default for BodyFieldToHeader {
    fn default() -> Self {
        Self::new()
    }
}

fn default_header_for(field: &str) -> String {
    if field == "model" {
        MODEL_HEADER.to_string()
    } else {
        format!("{HEADER_PREFIX}{field}")
    }
}

/// Header text for a body field. `null` and empty strings produce no header
/// since an empty header value carries nothing to route on.
fn header_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl BbrPlugin for BodyFieldToHeader {
    fn typed_name(&self) -> &TypedName {
        &self.typed_name
    }

    fn requires_full_parsing(&self) -> bool {
        false
    }

    fn capability(&self) -> Capability<'_> {
        Capability::MetadataExtractor(self)
    }
}

impl MetadataExtractor for BodyFieldToHeader {
    fn extract(
        &self,
        body: &[u8],
        metadata_keys: &[String],
        _shared: Option<ParsedBody<'_>>,
    ) -> Result<Headers, PluginError> {
        let fields: Map<String, Value> = serde_json::from_slice(body)?;
        let mut headers = Headers::new();

        if self.mappings.is_empty() {
            for key in metadata_keys {
                if let Some(value) = fields.get(key).and_then(header_value) {
                    headers.insert(default_header_for(key), value);
                }
            }
        } else {
            for (header, field) in &self.mappings {
                if let Some(value) = fields.get(field).and_then(header_value) {
                    headers.insert(header.clone(), value);
                }
            }
        }

        Ok(headers)
    }
}
