//! ext_proc streams over newline-delimited JSON frames
//!
//! Each line carries one [`ProcessingRequest`] or [`ProcessingResponse`] in
//! protobuf JSON form. A failed request is answered with an [`ErrorFrame`]
//! and the stream is closed, the way a gRPC stream ends with an error status.

pub mod tcp;

pub use tcp::ExtProcServer;

use crate::error::{RequestError, TransportError};
use crate::protocol::{ErrorFrame, ProcessingRequest, StatusCode};
use crate::proxy::{RequestHandler, StreamProcessor};
use crate::state::Metrics;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// Whether the proxy sends bodies in streamed chunks.
    pub streaming: bool,
    /// Caps each inbound line and the reassembled streamed body.
    pub max_frame_bytes: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            streaming: false,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Status reported to the proxy when a request fails.
pub fn status_for(error: &RequestError) -> StatusCode {
    match error {
        RequestError::MalformedBody(_) => StatusCode::InvalidArgument,
        RequestError::BodyTooLarge { .. } => StatusCode::ResourceExhausted,
        RequestError::ProtocolViolation { .. } | RequestError::Plugin { .. } => StatusCode::Internal,
    }
}

struct ActiveStream(Arc<Metrics>);

impl ActiveStream {
    fn open(metrics: Arc<Metrics>) -> Self {
        metrics.increment_active_streams();
        Self(metrics)
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.0.decrement_active_streams();
    }
}

type LineFramed<S> = Framed<S, LinesCodec>;

async fn send_frame<S, T>(framed: &mut LineFramed<S>, frame: &T) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Serialize,
{
    let line = serde_json::to_string(frame).map_err(|e| TransportError::SendFailed(e.to_string()))?;
    framed
        .send(line)
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

/// Serves one ext_proc stream until the peer closes it, a request fails or
/// shutdown is signalled.
pub async fn serve_stream<S>(
    io: S,
    handler: Arc<RequestHandler>,
    options: StreamOptions,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stream_id = Uuid::new_v4();
    let span = info_span!("ext_proc_stream", stream_id = %stream_id, streaming = options.streaming);

    async move {
        let _active = ActiveStream::open(handler.metrics().clone());
        let mut framed = Framed::new(io, LinesCodec::new_with_max_length(options.max_frame_bytes));
        let mut processor = StreamProcessor::new(handler, options.streaming)
            .with_max_body_bytes(options.max_frame_bytes);

        loop {
            let line = tokio::select! {
                frame = framed.next() => match frame {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => {
                        let error = TransportError::ReceiveFailed(e.to_string());
                        let frame = ErrorFrame::new(StatusCode::InvalidArgument, error.to_string());
                        // The peer may already be gone.
                        let _ = send_frame(&mut framed, &frame).await;
                        return Err(error);
                    }
                    None => {
                        debug!("Stream closed by peer");
                        return Ok(());
                    }
                },
                _ = shutdown.recv() => {
                    debug!("Stream closed for shutdown");
                    return Ok(());
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let request: ProcessingRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    let error = TransportError::InvalidFormat(e.to_string());
                    let frame = ErrorFrame::new(StatusCode::InvalidArgument, error.to_string());
                    let _ = send_frame(&mut framed, &frame).await;
                    return Err(error);
                }
            };

            match processor.process(request) {
                Ok(responses) => {
                    for response in &responses {
                        send_frame(&mut framed, response).await?;
                    }
                }
                Err(e) => {
                    warn!(error = %e, path = %processor.path(), "Aborting stream");
                    send_frame(&mut framed, &ErrorFrame::new(status_for(&e), e.to_string())).await?;
                    return Ok(());
                }
            }
        }
    }
    .instrument(span)
    .await
}
