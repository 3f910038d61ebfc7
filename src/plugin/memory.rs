//! Request-scoped parsed body shared across a plugin chain
//!
//! Plugins that declare `requires_full_parsing` get the body parsed once per
//! request, keyed by the endpoint path, instead of each plugin decoding the
//! JSON again.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
pub const COMPLETIONS_PATH: &str = "/v1/completions";

/// Body shapes the shared parse knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    ChatCompletions,
    Completions,
    Other,
}

impl Endpoint {
    /// Classifies a request path, ignoring any query string.
    pub fn from_path(path: &str) -> Self {
        let path = path.split_once('?').map_or(path, |(path, _)| path);
        match path {
            CHAT_COMPLETIONS_PATH => Endpoint::ChatCompletions,
            COMPLETIONS_PATH => Endpoint::Completions,
            _ => Endpoint::Other,
        }
    }
}

/// Reads an explicit `null` as the type's default, the same as an absent
/// field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// A single chat message. Content is kept as raw JSON since it may be a
/// string, an array of parts, or null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parsed `/v1/chat/completions` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parsed `/v1/completions` request. The prompt may be a string or an
/// array of strings or token ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(default)]
    pub prompt: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Borrowed view of whichever shape has been parsed for the request.
#[derive(Debug, Clone, Copy)]
pub enum ParsedBody<'a> {
    ChatCompletion(&'a ChatCompletionRequest),
    Completion(&'a CompletionRequest),
}

impl<'a> ParsedBody<'a> {
    pub fn model(&self) -> &'a str {
        match *self {
            ParsedBody::ChatCompletion(request) => &request.model,
            ParsedBody::Completion(request) => &request.model,
        }
    }
}

/// Parse cache owned by one request.
#[derive(Debug, Default)]
pub struct SharedMemory {
    chat_completion: Option<ChatCompletionRequest>,
    completion: Option<CompletionRequest>,
    parse_count: usize,
}

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `data` as a chat completion request and caches it, replacing
    /// any earlier chat completion parse.
    pub fn parse_chat_completion(
        &mut self,
        data: &[u8],
    ) -> Result<&ChatCompletionRequest, serde_json::Error> {
        self.parse_count += 1;
        let parsed: ChatCompletionRequest = serde_json::from_slice(data)?;
        Ok(&*self.chat_completion.insert(parsed))
    }

    /// Parses `data` as a completion request and caches it, replacing any
    /// earlier completion parse.
    pub fn parse_completion(&mut self, data: &[u8]) -> Result<&CompletionRequest, serde_json::Error> {
        self.parse_count += 1;
        let parsed: CompletionRequest = serde_json::from_slice(data)?;
        Ok(&*self.completion.insert(parsed))
    }

    /// Parses according to the endpoint. Returns `Ok(false)` for endpoints
    /// without a known body shape.
    pub fn parse_for(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<bool, serde_json::Error> {
        match endpoint {
            Endpoint::ChatCompletions => self.parse_chat_completion(data).map(|_| true),
            Endpoint::Completions => self.parse_completion(data).map(|_| true),
            Endpoint::Other => Ok(false),
        }
    }

    /// Returns the cached shape matching `path`, if any.
    pub fn get_shared_memory(&self, path: &str) -> Option<ParsedBody<'_>> {
        self.get(Endpoint::from_path(path))
    }

    pub fn get(&self, endpoint: Endpoint) -> Option<ParsedBody<'_>> {
        match endpoint {
            Endpoint::ChatCompletions => self
                .chat_completion
                .as_ref()
                .map(ParsedBody::ChatCompletion),
            Endpoint::Completions => self.completion.as_ref().map(ParsedBody::Completion),
            Endpoint::Other => None,
        }
    }

    pub fn chat_completion(&self) -> Option<&ChatCompletionRequest> {
        self.chat_completion.as_ref()
    }

    pub fn completion(&self) -> Option<&CompletionRequest> {
        self.completion.as_ref()
    }

    /// Number of parse attempts made against this memory, counting failed
    /// ones.
    pub fn parse_count(&self) -> usize {
        self.parse_count
    }
}
