use crate::config::Config;
use crate::datastore::{Datastore, StaticDatastore};
use crate::error::Result;
use crate::plugin::BodyRouter;
use crate::proxy::RequestHandler;
use std::sync::Arc;

pub mod metrics;

pub use metrics::Metrics;

/// Shared, read-only service state built once at startup.
pub struct AppState {
    pub config: Config,
    pub router: Arc<BodyRouter>,
    pub handler: Arc<RequestHandler>,
    pub metrics: Arc<Metrics>,
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl AppState {
    /// Assembles the plugin engine from `config`. Fails if any configured
    /// plugin cannot be registered.
    pub fn new(config: Config) -> Result<(Arc<Self>, tokio::sync::broadcast::Receiver<()>)> {
        let datastore: Arc<dyn Datastore> =
            Arc::new(StaticDatastore::new(config.plugins.base_models.clone()));
        Self::with_datastore(config, datastore)
    }

    pub fn with_datastore(
        config: Config,
        datastore: Arc<dyn Datastore>,
    ) -> Result<(Arc<Self>, tokio::sync::broadcast::Receiver<()>)> {
        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(16);

        let router = Arc::new(BodyRouter::from_config(&config.plugins, datastore)?);
        let metrics = Arc::new(Metrics::new());
        let handler = Arc::new(RequestHandler::new(router.clone(), metrics.clone()));

        let state = Arc::new(Self {
            config,
            router,
            handler,
            metrics,
            shutdown_tx,
        });

        Ok((state, shutdown_rx))
    }

    pub fn shutdown(&self) {
        // No receivers left is fine.
        let _ = self.shutdown_tx.send(());
    }
}
