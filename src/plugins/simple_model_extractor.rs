use crate::plugin::memory::ParsedBody;
use crate::plugin::schema::{
    BbrPlugin, Capability, Headers, MetadataExtractor, PluginError, TypedName,
    METADATA_EXTRACTOR_TYPE, MODEL_HEADER,
};
use crate::plugins::model_from_body;

pub const NAME: &str = "simple-model-extractor";

/// Copies the request's `model` field into `X-Gateway-Model-Name`.
#[derive(Debug, Clone)]
pub struct SimpleModelExtractor {
    typed_name: TypedName,
}

impl SimpleModelExtractor {
    pub fn new() -> Self {
        Self {
            typed_name: TypedName::new(METADATA_EXTRACTOR_TYPE, NAME),
        }
    }
}

impl Default for SimpleModelExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl BbrPlugin for SimpleModelExtractor {
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

impl MetadataExtractor for SimpleModelExtractor {
    fn extract(
        &self,
        body: &[u8],
        _metadata_keys: &[String],
        shared: Option<ParsedBody<'_>>,
    ) -> Result<Headers, PluginError> {
        let model = model_from_body(body, shared)?;
        let mut headers = Headers::new();
        if !model.is_empty() {
            headers.insert(MODEL_HEADER.to_string(), model);
        }
        Ok(headers)
    }
}
