use crate::error::RequestError;
use crate::plugin::memory::{Endpoint, SharedMemory};
use crate::plugin::schema::{Capability, Headers, MODEL_HEADER};
use crate::plugin::BodyRouter;
use crate::protocol::{
    BodyMutation, CommonResponse, HeaderMutation, HeaderValue, HeaderValueOption,
    ProcessingResponse,
};
use crate::state::metrics::{Metrics, RequestTimer};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Headers and effective body produced by one pass over the request chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainOutcome {
    pub headers: Headers,
    pub body: Bytes,
}

impl ChainOutcome {
    pub fn model(&self) -> Option<&str> {
        self.headers
            .get(MODEL_HEADER)
            .map(String::as_str)
            .filter(|model| !model.is_empty())
    }
}

/// Runs the request chain over complete bodies and builds the ext_proc
/// responses for them.
pub struct RequestHandler {
    router: Arc<BodyRouter>,
    metrics: Arc<Metrics>,
}

impl RequestHandler {
    pub fn new(router: Arc<BodyRouter>, metrics: Arc<Metrics>) -> Self {
        Self { router, metrics }
    }

    pub fn router(&self) -> &Arc<BodyRouter> {
        &self.router
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Processes a complete request body received for `path`.
    ///
    /// Bodies without a model are passed through untouched. Failures are
    /// returned to the caller, which aborts the stream.
    pub fn handle_request_body(
        &self,
        body: Bytes,
        path: &str,
        streaming: bool,
    ) -> Result<Vec<ProcessingResponse>, RequestError> {
        let timer = RequestTimer::new(self.metrics.clone());
        let endpoint = Endpoint::from_path(path);
        let mut memory = SharedMemory::new();

        let outcome = match self.execute_chain(&body, endpoint, &mut memory) {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_malformed_body() {
                    self.metrics.record_model_not_parsed();
                }
                warn!(path = %path, error = %e, "Request chain failed");
                timer.fail();
                return Err(e);
            }
        };
        timer.finish();

        match outcome.model() {
            Some(model) => {
                info!(model = %model, headers = outcome.headers.len(), "Routing on body metadata");
                self.metrics.record_success();
                Ok(routed_responses(outcome, streaming))
            }
            None => {
                info!(path = %path, "Request body does not contain a model");
                self.metrics.record_model_not_in_body();
                Ok(pass_through_responses(body, streaming))
            }
        }
    }

    /// Executes every resolvable chain entry in order against `body`.
    ///
    /// At most one full parse is made into `memory`, triggered by the first
    /// plugin that asks for it.
    pub fn execute_chain(
        &self,
        body: &Bytes,
        endpoint: Endpoint,
        memory: &mut SharedMemory,
    ) -> Result<ChainOutcome, RequestError> {
        let chain = self.router.request_chain();
        let registry = self.router.registry();

        let needs_parse = (0..chain.len())
            .filter_map(|index| chain.get_plugin(index, registry).ok())
            .any(|plugin| plugin.requires_full_parsing());
        if needs_parse && memory.parse_for(endpoint, body).map_err(RequestError::MalformedBody)? {
            debug!(endpoint = ?endpoint, "Parsed request body into shared memory");
        }

        let mut headers = Headers::new();
        let mut effective_body = body.clone();

        for index in 0..chain.len() {
            let plugin = match chain.get_plugin(index, registry) {
                Ok(plugin) => plugin,
                Err(e) => {
                    warn!(index, error = %e, "Skipping unresolvable plugin");
                    self.metrics.record_plugin_resolution_failure();
                    continue;
                }
            };
            let typed_name = plugin.typed_name();
            let shared = memory.get(endpoint);

            match plugin.capability() {
                Capability::MetadataExtractor(extractor) => {
                    let produced = extractor
                        .extract(body, self.router.metadata_keys(), shared)
                        .map_err(|e| RequestError::from_plugin(typed_name, e))?;
                    debug!(plugin = %typed_name, headers = produced.len(), "Extractor finished");
                    merge_overwrite(&mut headers, produced);
                }
                Capability::ModelSelector(selector) => {
                    let selection = selector
                        .select(body, shared)
                        .map_err(|e| RequestError::from_plugin(typed_name, e))?;
                    if selection.body.is_empty() {
                        return Err(RequestError::ProtocolViolation {
                            plugin: typed_name.clone(),
                        });
                    }
                    debug!(plugin = %typed_name, headers = selection.headers.len(), "Selector finished");
                    effective_body = selection.body;
                    merge_fill_absent(&mut headers, selection.headers);
                }
                Capability::Unknown => {
                    warn!(plugin = %typed_name, "Plugin has no request capability, skipping");
                }
            }
        }

        Ok(ChainOutcome {
            headers,
            body: effective_body,
        })
    }
}

/// Later values replace earlier ones.
pub fn merge_overwrite(target: &mut Headers, source: Headers) {
    target.extend(source);
}

/// Only keys not already present are added.
pub fn merge_fill_absent(target: &mut Headers, source: Headers) {
    for (key, value) in source {
        target.entry(key).or_insert(value);
    }
}

/// Header mutation with the model header first and the rest by name.
pub fn header_mutation(headers: Headers) -> HeaderMutation {
    let mut entries: Vec<(String, String)> = headers.into_iter().collect();
    entries.sort_by(|(a, _), (b, _)| {
        (a.as_str() != MODEL_HEADER)
            .cmp(&(b.as_str() != MODEL_HEADER))
            .then_with(|| a.cmp(b))
    });

    HeaderMutation {
        set_headers: entries
            .into_iter()
            .map(|(key, value)| HeaderValueOption {
                header: HeaderValue::raw(key, value),
            })
            .collect(),
    }
}

/// Responses for a body that was routed on its metadata.
pub fn routed_responses(outcome: ChainOutcome, streaming: bool) -> Vec<ProcessingResponse> {
    let mutation = header_mutation(outcome.headers);

    if streaming {
        vec![
            ProcessingResponse::request_headers(Some(CommonResponse {
                header_mutation: Some(mutation),
                clear_route_cache: true,
                ..Default::default()
            })),
            ProcessingResponse::streamed_body(outcome.body),
        ]
    } else {
        vec![ProcessingResponse::request_body(Some(CommonResponse {
            header_mutation: Some(mutation),
            body_mutation: Some(BodyMutation::Body(outcome.body)),
            clear_route_cache: true,
        }))]
    }
}

/// Responses leaving the request untouched. In streaming mode the chunks
/// were held back, so the original body is sent on.
pub fn pass_through_responses(body: Bytes, streaming: bool) -> Vec<ProcessingResponse> {
    if streaming {
        vec![
            ProcessingResponse::request_headers(None),
            ProcessingResponse::streamed_body(body),
        ]
    } else {
        vec![ProcessingResponse::request_body(None)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(entries: &[(&str, &str)]) -> Headers {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_semantics() {
        let mut target = headers(&[("a", "1")]);
        merge_overwrite(&mut target, headers(&[("a", "2"), ("b", "1")]));
        assert_eq!(target, headers(&[("a", "2"), ("b", "1")]));

        merge_fill_absent(&mut target, headers(&[("a", "3"), ("c", "1")]));
        assert_eq!(target, headers(&[("a", "2"), ("b", "1"), ("c", "1")]));
    }

    #[test]
    fn test_header_mutation_orders_model_first() {
        let mutation = header_mutation(headers(&[
            ("X-Gateway-Base-Model-Name", "base"),
            ("A-Header", "a"),
            (MODEL_HEADER, "foo"),
        ]));

        let keys: Vec<&str> = mutation
            .set_headers
            .iter()
            .map(|option| option.header.key.as_str())
            .collect();
        assert_eq!(keys, vec![MODEL_HEADER, "A-Header", "X-Gateway-Base-Model-Name"]);
        assert_eq!(mutation.get(MODEL_HEADER).as_deref(), Some("foo"));
    }

    #[test]
    fn test_pass_through_shapes() {
        let body = Bytes::from_static(br#"{"prompt":"hi"}"#);
        assert_eq!(
            pass_through_responses(body.clone(), false),
            vec![ProcessingResponse::request_body(None)]
        );
        assert_eq!(
            pass_through_responses(body.clone(), true),
            vec![
                ProcessingResponse::request_headers(None),
                ProcessingResponse::streamed_body(body),
            ]
        );
    }

    #[test]
    fn test_routed_non_streaming_shape() {
        let outcome = ChainOutcome {
            headers: headers(&[(MODEL_HEADER, "foo")]),
            body: Bytes::from_static(b"{}"),
        };
        let responses = routed_responses(outcome, false);
        assert_eq!(responses.len(), 1);

        let common = responses[0].common().unwrap();
        assert!(common.clear_route_cache);
        assert_eq!(
            common.body_mutation,
            Some(BodyMutation::Body(Bytes::from_static(b"{}")))
        );
    }
}
