use crate::datastore::Datastore;
use crate::plugin::memory::ParsedBody;
use crate::plugin::schema::{
    BbrPlugin, Capability, Headers, MetadataExtractor, PluginError, TypedName, BASE_MODEL_HEADER,
    METADATA_EXTRACTOR_TYPE, MODEL_HEADER,
};
use crate::plugins::string_model_from_body;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub const NAME: &str = "model-to-header";

/// Emits the model header and, when the datastore knows one, the base model
/// the requested adapter is served from.
#[derive(Clone)]
pub struct ModelToHeader {
    typed_name: TypedName,
    datastore: Option<Arc<dyn Datastore>>,
}

impl ModelToHeader {
    pub fn new() -> Self {
        Self {
            typed_name: TypedName::new(METADATA_EXTRACTOR_TYPE, NAME),
            datastore: None,
        }
    }

    pub fn with_datastore(mut self, datastore: Arc<dyn Datastore>) -> Self {
        self.datastore = Some(datastore);
        self
    }
}

impl Default for ModelToHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModelToHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelToHeader")
            .field("typed_name", &self.typed_name)
            .field("has_datastore", &self.datastore.is_some())
            .finish()
    }
}

impl BbrPlugin for ModelToHeader {
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

impl MetadataExtractor for ModelToHeader {
    fn extract(
        &self,
        body: &[u8],
        _metadata_keys: &[String],
        shared: Option<ParsedBody<'_>>,
    ) -> Result<Headers, PluginError> {
        let model = string_model_from_body(body, shared)?;
        let mut headers = Headers::new();
        if model.is_empty() {
            return Ok(headers);
        }

        if let Some(base) = self
            .datastore
            .as_ref()
            .and_then(|datastore| datastore.get_base_model(&model))
        {
            debug!(model = %model, base_model = %base, "Resolved base model");
            headers.insert(BASE_MODEL_HEADER.to_string(), base);
        }
        headers.insert(MODEL_HEADER.to_string(), model);
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MockDatastore;
    use mockall::predicate::eq;

    #[test]
    fn test_adds_base_model_from_datastore() {
        let mut datastore = MockDatastore::new();
        datastore
            .expect_get_base_model()
            .with(eq("sql-lora"))
            .times(1)
            .returning(|_| Some("meta-llama/Llama-3.1-8B".to_string()));

        let plugin = ModelToHeader::new().with_datastore(Arc::new(datastore));
        let headers = plugin
            .extract(br#"{"model":"sql-lora"}"#, &[], None)
            .unwrap();

        assert_eq!(headers[MODEL_HEADER], "sql-lora");
        assert_eq!(headers[BASE_MODEL_HEADER], "meta-llama/Llama-3.1-8B");
    }

    #[test]
    fn test_unknown_base_model_only_sets_model_header() {
        let mut datastore = MockDatastore::new();
        datastore.expect_get_base_model().returning(|_| None);

        let plugin = ModelToHeader::new().with_datastore(Arc::new(datastore));
        let headers = plugin.extract(br#"{"model":"foo"}"#, &[], None).unwrap();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers[MODEL_HEADER], "foo");
    }

    #[test]
    fn test_without_datastore() {
        let plugin = ModelToHeader::new();
        let headers = plugin.extract(br#"{"model":"foo"}"#, &[], None).unwrap();
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_missing_model_skips_datastore() {
        let mut datastore = MockDatastore::new();
        datastore.expect_get_base_model().never();

        let plugin = ModelToHeader::new().with_datastore(Arc::new(datastore));
        let headers = plugin.extract(br#"{"prompt":"hi"}"#, &[], None).unwrap();
        assert!(headers.is_empty());
    }

    #[test]
    fn test_non_string_model_emits_nothing() {
        let mut datastore = MockDatastore::new();
        datastore.expect_get_base_model().never();

        let plugin = ModelToHeader::new().with_datastore(Arc::new(datastore));
        for body in [
            &br#"{"model":42,"prompt":"hi"}"#[..],
            &br#"{"model":{"name":"foo"}}"#[..],
        ] {
            let headers = plugin.extract(body, &[], None).unwrap();
            assert!(headers.is_empty());
        }
    }
}
