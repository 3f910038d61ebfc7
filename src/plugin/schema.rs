//! Plugin capability contracts
//!
//! Every plugin exposes a [`TypedName`] and declares whether it needs the
//! request-scoped [`SharedMemory`](crate::plugin::memory::SharedMemory) to be
//! populated before it runs. Plugins then specialise into one of the
//! capabilities the request handler knows how to drive.

use crate::plugin::memory::ParsedBody;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Header carrying the model name extracted from the request body.
pub const MODEL_HEADER: &str = "X-Gateway-Model-Name";

/// Header carrying the base model of an adapter, when one is known.
pub const BASE_MODEL_HEADER: &str = "X-Gateway-Base-Model-Name";

pub const METADATA_EXTRACTOR_TYPE: &str = "MetadataExtractor";
pub const MODEL_SELECTOR_TYPE: &str = "ModelSelector";
pub const GUARD_RAIL_TYPE: &str = "GuardRail";

/// Plugin types and the implementations allowed for each of them.
///
/// Registrations for a pair missing from this table are rejected.
pub const SUPPORTED_INTERFACES: &[(&str, &[&str])] = &[
    (
        METADATA_EXTRACTOR_TYPE,
        &[
            "simple-model-extractor",
            "body-field-to-header",
            "model-to-header",
        ],
    ),
    (
        MODEL_SELECTOR_TYPE,
        &["lora-adapter-selector", "semantic-model-selector"],
    ),
    (
        GUARD_RAIL_TYPE,
        &["bad-words-blocker", "pid-disclosure-blocker"],
    ),
];

/// Returns the allowed implementations for `type_key`, or `None` when the
/// type itself is unsupported.
pub fn supported_implementations(type_key: &str) -> Option<&'static [&'static str]> {
    SUPPORTED_INTERFACES
        .iter()
        .find(|(supported, _)| *supported == type_key)
        .map(|(_, implementations)| *implementations)
}

/// Capability category plus implementation name of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypedName {
    #[serde(rename = "type")]
    pub type_key: String,
    pub name: String,
}

impl TypedName {
    pub fn new(type_key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_key: type_key.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TypedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_key, self.name)
    }
}

/// Headers produced by a single plugin invocation.
pub type Headers = HashMap<String, String>;

/// Tagged view of what a plugin can do, used by the request handler to
/// dispatch without downcasting.
pub enum Capability<'a> {
    MetadataExtractor(&'a dyn MetadataExtractor),
    ModelSelector(&'a dyn ModelSelector),
    Unknown,
}

/// Base contract shared by all body-based routing plugins.
pub trait BbrPlugin: Send + Sync {
    fn typed_name(&self) -> &TypedName;

    /// Whether the shared parse of the body must exist before this plugin runs.
    fn requires_full_parsing(&self) -> bool;

    fn capability(&self) -> Capability<'_> {
        Capability::Unknown
    }
}

/// Read-only plugin deriving header values from the request body.
pub trait MetadataExtractor: BbrPlugin {
    fn extract(
        &self,
        body: &[u8],
        metadata_keys: &[String],
        shared: Option<ParsedBody<'_>>,
    ) -> Result<Headers, PluginError>;
}

/// Plugin allowed to rewrite the request body.
///
/// The returned [`Selection::body`] must never be empty; implementations that
/// leave the body alone echo the original bytes back.
pub trait ModelSelector: BbrPlugin {
    fn select(&self, body: &Bytes, shared: Option<ParsedBody<'_>>)
        -> Result<Selection, PluginError>;
}

/// Output of a [`ModelSelector`].
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub headers: Headers,
    pub body: Bytes,
}

impl Selection {
    /// Selection that leaves the body untouched.
    pub fn unchanged(headers: Headers, body: &Bytes) -> Self {
        Self {
            headers,
            body: body.clone(),
        }
    }
}

/// Errors raised by plugins while processing a request.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The body could not be parsed into the structure the plugin needs.
    #[error("malformed request body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    /// The body was valid JSON but a field had an unusable shape.
    #[error("field '{field}' has an unsupported value: {reason}")]
    InvalidField { field: String, reason: String },

    /// The body could not be re-encoded after a mutation.
    #[error("failed to encode mutated body: {reason}")]
    EncodeFailed { reason: String },
}
