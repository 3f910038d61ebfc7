//! ext_proc message vocabulary
//!
//! Mirrors the Envoy external-processing request and response messages in
//! their protobuf JSON mapping: camelCase field names, `oneof` members as
//! single-key objects and `bytes` fields as base64 strings.

pub mod encoding;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Message received from the proxy on an ext_proc stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessingRequest {
    RequestHeaders(HttpHeaders),
    RequestBody(HttpBody),
    RequestTrailers(HttpTrailers),
    ResponseHeaders(HttpHeaders),
    ResponseBody(HttpBody),
    ResponseTrailers(HttpTrailers),
}

impl ProcessingRequest {
    pub fn phase(&self) -> &'static str {
        match self {
            ProcessingRequest::RequestHeaders(_) => "request_headers",
            ProcessingRequest::RequestBody(_) => "request_body",
            ProcessingRequest::RequestTrailers(_) => "request_trailers",
            ProcessingRequest::ResponseHeaders(_) => "response_headers",
            ProcessingRequest::ResponseBody(_) => "response_body",
            ProcessingRequest::ResponseTrailers(_) => "response_trailers",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpHeaders {
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub end_of_stream: bool,
}

impl HttpHeaders {
    /// Case-insensitive header lookup.
    pub fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.headers.get(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpBody {
    #[serde(default, with = "encoding::base64_bytes")]
    pub body: Bytes,
    #[serde(default)]
    pub end_of_stream: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTrailers {
    #[serde(default)]
    pub trailers: HeaderMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderMap {
    #[serde(default)]
    pub headers: Vec<HeaderValue>,
}

impl HeaderMap {
    pub fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.headers
            .iter()
            .find(|header| header.key.eq_ignore_ascii_case(key))
            .map(HeaderValue::value_str)
    }
}

/// A single header. Proxies send either `value` or `rawValue`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderValue {
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(
        default,
        with = "encoding::base64_bytes",
        skip_serializing_if = "Bytes::is_empty"
    )]
    pub raw_value: Bytes,
}

impl HeaderValue {
    pub fn raw(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
            raw_value: Bytes::from(value.into()),
        }
    }

    pub fn value_str(&self) -> Cow<'_, str> {
        if self.value.is_empty() {
            String::from_utf8_lossy(&self.raw_value)
        } else {
            Cow::Borrowed(&self.value)
        }
    }
}

/// Message sent back to the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessingResponse {
    RequestHeaders(HeadersResponse),
    RequestBody(BodyResponse),
    RequestTrailers(TrailersResponse),
    ResponseHeaders(HeadersResponse),
    ResponseBody(BodyResponse),
    ResponseTrailers(TrailersResponse),
}

impl ProcessingResponse {
    pub fn request_headers(response: Option<CommonResponse>) -> Self {
        ProcessingResponse::RequestHeaders(HeadersResponse { response })
    }

    pub fn request_body(response: Option<CommonResponse>) -> Self {
        ProcessingResponse::RequestBody(BodyResponse { response })
    }

    /// Streamed body chunk carrying the whole body and closing the stream.
    pub fn streamed_body(body: Bytes) -> Self {
        Self::request_body(Some(CommonResponse {
            body_mutation: Some(BodyMutation::StreamedResponse(StreamedBodyResponse {
                body,
                end_of_stream: true,
            })),
            ..Default::default()
        }))
    }

    /// Empty response for a phase this filter does not act on.
    pub fn pass_through(request: &ProcessingRequest) -> Self {
        match request {
            ProcessingRequest::RequestHeaders(_) => Self::request_headers(None),
            ProcessingRequest::RequestBody(_) => Self::request_body(None),
            ProcessingRequest::RequestTrailers(_) => {
                ProcessingResponse::RequestTrailers(TrailersResponse::default())
            }
            ProcessingRequest::ResponseHeaders(_) => {
                ProcessingResponse::ResponseHeaders(HeadersResponse::default())
            }
            ProcessingRequest::ResponseBody(_) => {
                ProcessingResponse::ResponseBody(BodyResponse::default())
            }
            ProcessingRequest::ResponseTrailers(_) => {
                ProcessingResponse::ResponseTrailers(TrailersResponse::default())
            }
        }
    }

    /// Common response of a headers or body response, if any.
    pub fn common(&self) -> Option<&CommonResponse> {
        match self {
            ProcessingResponse::RequestHeaders(r) | ProcessingResponse::ResponseHeaders(r) => {
                r.response.as_ref()
            }
            ProcessingResponse::RequestBody(r) | ProcessingResponse::ResponseBody(r) => {
                r.response.as_ref()
            }
            ProcessingResponse::RequestTrailers(_) | ProcessingResponse::ResponseTrailers(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadersResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CommonResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CommonResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailersResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_mutation: Option<HeaderMutation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_mutation: Option<HeaderMutation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_mutation: Option<BodyMutation>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub clear_route_cache: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMutation {
    #[serde(default)]
    pub set_headers: Vec<HeaderValueOption>,
}

impl HeaderMutation {
    pub fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.set_headers
            .iter()
            .find(|option| option.header.key.eq_ignore_ascii_case(key))
            .map(|option| option.header.value_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderValueOption {
    pub header: HeaderValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodyMutation {
    Body(#[serde(with = "encoding::base64_bytes")] Bytes),
    StreamedResponse(StreamedBodyResponse),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamedBodyResponse {
    #[serde(default, with = "encoding::base64_bytes")]
    pub body: Bytes,
    #[serde(default)]
    pub end_of_stream: bool,
}

/// gRPC-style status codes reported when a stream is aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    InvalidArgument,
    ResourceExhausted,
    Internal,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub code: StatusCode,
    pub message: String,
}

/// Terminal frame sent before closing a failed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: StreamStatus,
}

impl ErrorFrame {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            error: StreamStatus {
                code,
                message: message.into(),
            },
        }
    }
}
