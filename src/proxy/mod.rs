//! Per-stream ext_proc processing
//!
//! A [`StreamProcessor`] owns the state of one ext_proc stream (the request
//! path and any body chunks held back in streaming mode) and turns each
//! inbound message into the responses owed to the proxy.

pub mod handler;


pub use handler::{ChainOutcome, RequestHandler};

use crate::error::RequestError;
use crate::protocol::{ProcessingRequest, ProcessingResponse};
use bytes::BytesMut;
use std::sync::Arc;
use tracing::debug;

pub const PATH_HEADER: &str = ":path";

/// Cap on a streamed body held back while waiting for its last chunk.
pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

pub struct StreamProcessor {
    handler: Arc<RequestHandler>,
    streaming: bool,
    path: String,
    body: BytesMut,
    max_body_bytes: usize,
}

impl StreamProcessor {
    pub fn new(handler: Arc<RequestHandler>, streaming: bool) -> Self {
        Self {
            handler,
            streaming,
            path: String::new(),
            body: BytesMut::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Responses for one inbound message. In streaming mode nothing is
    /// returned until the last body chunk arrives.
    pub fn process(
        &mut self,
        request: ProcessingRequest,
    ) -> Result<Vec<ProcessingResponse>, RequestError> {
        match request {
            ProcessingRequest::RequestHeaders(headers) => {
                self.path = headers
                    .get(PATH_HEADER)
                    .map(|path| path.into_owned())
                    .unwrap_or_default();
                debug!(path = %self.path, end_of_stream = headers.end_of_stream, "Request headers");

                // Without a body there is nothing left to decide on.
                if headers.end_of_stream || !self.streaming {
                    Ok(vec![ProcessingResponse::request_headers(None)])
                } else {
                    Ok(Vec::new())
                }
            }
            ProcessingRequest::RequestBody(chunk) => {
                if !self.streaming {
                    return self
                        .handler
                        .handle_request_body(chunk.body, &self.path, false);
                }

                if self.body.len() + chunk.body.len() > self.max_body_bytes {
                    self.body.clear();
                    self.handler.metrics().record_request_failure();
                    return Err(RequestError::BodyTooLarge {
                        limit: self.max_body_bytes,
                    });
                }
                self.body.extend_from_slice(&chunk.body);
                if !chunk.end_of_stream {
                    debug!(buffered = self.body.len(), "Holding request body chunk");
                    return Ok(Vec::new());
                }
                let body = self.body.split().freeze();
                self.handler.handle_request_body(body, &self.path, true)
            }
            other => {
                debug!(phase = other.phase(), "Passing through");
                Ok(vec![ProcessingResponse::pass_through(&other)])
            }
        }
    }
}
