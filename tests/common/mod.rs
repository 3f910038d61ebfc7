//! Fake plugins and builders shared by the integration tests

#![allow(dead_code)]

use body_based_router::plugin::schema::{
    GUARD_RAIL_TYPE, METADATA_EXTRACTOR_TYPE, MODEL_SELECTOR_TYPE,
};
use body_based_router::plugin::{
    BbrPlugin, BodyRouter, Capability, Headers, MetadataExtractor, ModelSelector, ParsedBody,
    PluginChain, PluginError, PluginFactory, PluginRegistry, Selection, TypedName,
};
use body_based_router::proxy::RequestHandler;
use body_based_router::state::Metrics;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Extractor returning the next value from a fixed list on every call.
pub struct SequenceExtractor {
    typed_name: TypedName,
    key: String,
    values: Vec<String>,
    calls: AtomicUsize,
    requires_parsing: bool,
}

impl SequenceExtractor {
    pub fn new(key: &str, values: &[&str]) -> Self {
        Self {
            typed_name: TypedName::new(METADATA_EXTRACTOR_TYPE, "body-field-to-header"),
            key: key.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
            calls: AtomicUsize::new(0),
            requires_parsing: false,
        }
    }

    pub fn requiring_parse(mut self) -> Self {
        self.requires_parsing = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BbrPlugin for SequenceExtractor {
    fn typed_name(&self) -> &TypedName {
        &self.typed_name
    }

    fn requires_full_parsing(&self) -> bool {
        self.requires_parsing
    }

    fn capability(&self) -> Capability<'_> {
        Capability::MetadataExtractor(self)
    }
}

impl MetadataExtractor for SequenceExtractor {
    fn extract(
        &self,
        _body: &[u8],
        _metadata_keys: &[String],
        _shared: Option<ParsedBody<'_>>,
    ) -> Result<Headers, PluginError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut headers = Headers::new();
        if let Some(value) = self.values.get(call % self.values.len().max(1)) {
            headers.insert(self.key.clone(), value.clone());
        }
        Ok(headers)
    }
}

/// Selector returning fixed headers and body.
pub struct FixedSelector {
    typed_name: TypedName,
    headers: Headers,
    body: Option<Bytes>,
    requires_parsing: bool,
    saw_shared: AtomicUsize,
}

impl FixedSelector {
    /// `body` of `None` echoes the request body.
    pub fn new(headers: &[(&str, &str)], body: Option<&'static [u8]>) -> Self {
        Self {
            typed_name: TypedName::new(MODEL_SELECTOR_TYPE, "semantic-model-selector"),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.map(Bytes::from_static),
            requires_parsing: false,
            saw_shared: AtomicUsize::new(0),
        }
    }

    pub fn requiring_parse(mut self) -> Self {
        self.requires_parsing = true;
        self
    }

    /// Calls that received the shared parse.
    pub fn shared_calls(&self) -> usize {
        self.saw_shared.load(Ordering::SeqCst)
    }
}

impl BbrPlugin for FixedSelector {
    fn typed_name(&self) -> &TypedName {
        &self.typed_name
    }

    fn requires_full_parsing(&self) -> bool {
        self.requires_parsing
    }

    fn capability(&self) -> Capability<'_> {
        Capability::ModelSelector(self)
    }
}

impl ModelSelector for FixedSelector {
    fn select(&self, body: &Bytes, shared: Option<ParsedBody<'_>>) -> Result<Selection, PluginError> {
        if shared.is_some() {
            self.saw_shared.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Selection {
            headers: self.headers.clone(),
            body: self.body.clone().unwrap_or_else(|| body.clone()),
        })
    }
}

/// Plugin with a type the request handler does not drive.
pub struct GuardRail {
    typed_name: TypedName,
}

impl GuardRail {
    pub fn new() -> Self {
        Self {
            typed_name: TypedName::new(GUARD_RAIL_TYPE, "bad-words-blocker"),
        }
    }
}

impl BbrPlugin for GuardRail {
    fn typed_name(&self) -> &TypedName {
        &self.typed_name
    }

    fn requires_full_parsing(&self) -> bool {
        false
    }
}

pub fn factory_for(plugin: Arc<dyn BbrPlugin>) -> PluginFactory {
    Arc::new(move || plugin.clone())
}

/// Registers each plugin under its own type.
pub fn registry_with(plugins: &[Arc<dyn BbrPlugin>]) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    for plugin in plugins {
        let type_key = plugin.typed_name().type_key.clone();
        registry
            .register_factory(&type_key, factory_for(plugin.clone()))
            .unwrap();
        let created = registry.create_plugin(&type_key).unwrap();
        registry.register_plugin(created).unwrap();
    }
    registry
}

/// Router whose chain lists `order` (type keys) over the given plugins.
pub fn router(plugins: &[Arc<dyn BbrPlugin>], order: &[&str]) -> BodyRouter {
    let registry = registry_with(plugins);
    let mut chain = PluginChain::new();
    for type_key in order {
        chain.add_plugin(type_key, &registry).unwrap();
    }
    BodyRouter::new(registry, chain, vec!["model".to_string()])
}

pub fn handler(router: BodyRouter) -> (Arc<RequestHandler>, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let handler = Arc::new(RequestHandler::new(Arc::new(router), metrics.clone()));
    (handler, metrics)
}
