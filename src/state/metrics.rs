use prometheus::{Histogram, IntCounter, IntGauge, Registry};
use std::sync::Arc;
use std::time::Instant;

pub struct Metrics {
    registry: Registry,

    // Routing outcomes
    pub success_total: IntCounter,
    pub model_not_in_body_total: IntCounter,
    pub model_not_parsed_total: IntCounter,
    pub request_failures_total: IntCounter,

    // Chain execution
    pub plugin_resolution_failures_total: IntCounter,

    // Streams
    pub active_streams: IntGauge,
    pub request_duration: Histogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let success_total = IntCounter::new(
            "bbr_success_total",
            "Requests whose body named a model and were routed on it",
        )
        .expect("metric creation failed");
        let model_not_in_body_total = IntCounter::new(
            "bbr_model_not_in_body_total",
            "Requests passed through because no model was found in the body",
        )
        .expect("metric creation failed");
        let model_not_parsed_total = IntCounter::new(
            "bbr_model_not_parsed_total",
            "Requests failed because the body could not be parsed",
        )
        .expect("metric creation failed");
        let request_failures_total = IntCounter::new(
            "bbr_request_failures_total",
            "Requests failed by the plugin chain",
        )
        .expect("metric creation failed");

        let plugin_resolution_failures_total = IntCounter::new(
            "bbr_plugin_resolution_failures_total",
            "Chain entries skipped because their plugin could not be resolved",
        )
        .expect("metric creation failed");

        let active_streams = IntGauge::new("bbr_active_streams", "Number of open ext_proc streams")
            .expect("metric creation failed");
        let request_duration = Histogram::with_opts(prometheus::HistogramOpts::new(
            "bbr_request_duration_seconds",
            "Request body processing duration in seconds",
        ))
        .expect("metric creation failed");

        registry.register(Box::new(success_total.clone())).unwrap();
        registry
            .register(Box::new(model_not_in_body_total.clone()))
            .unwrap();
        registry
            .register(Box::new(model_not_parsed_total.clone()))
            .unwrap();
        registry
            .register(Box::new(request_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(plugin_resolution_failures_total.clone()))
            .unwrap();
        registry.register(Box::new(active_streams.clone())).unwrap();
        registry
            .register(Box::new(request_duration.clone()))
            .unwrap();

        Self {
            registry,
            success_total,
            model_not_in_body_total,
            model_not_parsed_total,
            request_failures_total,
            plugin_resolution_failures_total,
            active_streams,
            request_duration,
        }
    }

    pub fn record_success(&self) {
        self.success_total.inc();
    }

    pub fn record_model_not_in_body(&self) {
        self.model_not_in_body_total.inc();
    }

    pub fn record_model_not_parsed(&self) {
        self.model_not_parsed_total.inc();
    }

    pub fn record_request_failure(&self) {
        self.request_failures_total.inc();
    }

    pub fn record_plugin_resolution_failure(&self) {
        self.plugin_resolution_failures_total.inc();
    }

    pub fn increment_active_streams(&self) {
        self.active_streams.inc();
    }

    pub fn decrement_active_streams(&self) {
        self.active_streams.dec();
    }

    pub fn record_request_duration(&self, duration: std::time::Duration) {
        self.request_duration.observe(duration.as_secs_f64());
    }

    pub fn gather_metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}

/// Times one request body through the chain.
pub struct RequestTimer {
    start: Instant,
    metrics: Arc<Metrics>,
}

impl RequestTimer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    pub fn finish(self) {
        self.metrics.record_request_duration(self.start.elapsed());
    }

    pub fn fail(self) {
        self.metrics.record_request_duration(self.start.elapsed());
        self.metrics.record_request_failure();
    }
}
