use crate::error::TransportError;
use crate::proxy::RequestHandler;
use crate::transport::{serve_stream, StreamOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// TCP listener serving one ext_proc stream per connection.
pub struct ExtProcServer {
    listener: TcpListener,
    handler: Arc<RequestHandler>,
    options: StreamOptions,
}

impl ExtProcServer {
    pub async fn bind(
        addr: &str,
        handler: Arc<RequestHandler>,
        options: StreamOptions,
    ) -> Result<Self, TransportError> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| TransportError::InvalidAddress(format!("{addr}: {e}")))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            listener,
            handler,
            options,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener
            .local_addr()
            .map_err(|e| TransportError::InvalidAddress(e.to_string()))
    }

    /// Accepts connections until shutdown is signalled.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), TransportError> {
        let local_addr = self.local_addr()?;
        info!(
            addr = %local_addr,
            streaming = self.options.streaming,
            "ext_proc server listening"
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "Accepted ext_proc connection");
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                            }

                            let handler = self.handler.clone();
                            let options = self.options;
                            let stream_shutdown = shutdown.resubscribe();
                            tokio::spawn(async move {
                                if let Err(e) = serve_stream(stream, handler, options, stream_shutdown).await {
                                    warn!(peer = %peer_addr, error = %e, "ext_proc stream failed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept ext_proc connection");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("ext_proc server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
