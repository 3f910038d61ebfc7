//! Admin HTTP surface: health, Prometheus metrics and the active plugin chain.

use crate::error::{ConfigError, Result};
use crate::state::AppState;
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

pub async fn start_server(state: Arc<AppState>) -> Result<()> {
    let addr = state.config.admin.address();
    tracing::info!("Starting admin server on {}", addr);

    let addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| ConfigError::Parse(format!("Invalid admin address: {e}")))?;

    let routes = routes(state.clone());
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async move {
        let _ = shutdown_rx.recv().await;
    });

    server.await;

    tracing::info!("Admin server stopped");
    Ok(())
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let health = warp::path("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "healthy",
            "service": "body-based-router"
        }))
    });

    let metrics = warp::path("metrics")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_metrics);

    let plugins = warp::path("plugins")
        .and(warp::get())
        .and(with_state(state))
        .and_then(get_plugins);

    health.or(metrics).or(plugins)
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn get_metrics(state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    let reply = match encoder.encode(&state.metrics.gather_metrics(), &mut buffer) {
        Ok(()) => warp::reply::with_status(
            warp::reply::with_header(buffer, "content-type", encoder.format_type().to_string()),
            StatusCode::OK,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            warp::reply::with_status(
                warp::reply::with_header(
                    e.to_string().into_bytes(),
                    "content-type",
                    "text/plain".to_string(),
                ),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    };

    Ok(reply)
}

async fn get_plugins(state: Arc<AppState>) -> std::result::Result<impl Reply, Rejection> {
    let router = &state.router;
    let mut registered = router.registry().list_plugins();
    registered.sort();

    Ok(warp::reply::json(&serde_json::json!({
        "chain": router.resolved_chain(),
        "registered": registered,
        "metadata_keys": router.metadata_keys(),
        "streaming": state.config.server.streaming,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn state() -> Arc<AppState> {
        let mut config = Config::default();
        config.plugins.request_chain =
            "MetadataExtractor:simple-model-extractor\nModelSelector:lora-adapter-selector"
                .to_string();
        AppState::new(config).unwrap().0
    }

    #[tokio::test]
    async fn test_health() {
        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes(state()))
            .await;

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_metrics_text_format() {
        let state = state();
        state.metrics.record_success();

        let response = warp::test::request()
            .method("GET")
            .path("/metrics")
            .reply(&routes(state))
            .await;

        assert_eq!(response.status(), 200);
        let body = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(body.contains("bbr_success_total 1"));
    }

    #[tokio::test]
    async fn test_plugins_listing() {
        let response = warp::test::request()
            .method("GET")
            .path("/plugins")
            .reply(&routes(state()))
            .await;

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["chain"][0]["type"], "MetadataExtractor");
        assert_eq!(body["chain"][1]["name"], "lora-adapter-selector");
        assert_eq!(
            body["registered"],
            serde_json::json!(["MetadataExtractor", "ModelSelector"])
        );
        assert_eq!(body["metadata_keys"], serde_json::json!(["model"]));
    }
}
