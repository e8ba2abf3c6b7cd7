//! WebSocket server and per-connection socket tasks.

use std::net::SocketAddr;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::services::{AdmissionError, FanoutService, Outbound};
use crate::domain::protocol::ProtocolError;
use crate::domain::subscription::ConnectionId;

const OVERLOADED_REASON: &str = "server overloaded";

// =============================================================================
// Router
// =============================================================================

#[derive(Clone)]
struct WsState {
    service: FanoutService,
    max_message_bytes: usize,
}

/// Build the WebSocket router.
pub fn router(service: FanoutService, max_message_bytes: usize) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(WsState {
        service,
        max_message_bytes,
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.max_message_size(state.max_message_bytes)
        .max_frame_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state.service))
}

// =============================================================================
// Connection Handling
// =============================================================================

async fn handle_socket(mut socket: WebSocket, service: FanoutService) {
    let (tx, rx) = mpsc::channel(service.settings().outbound_buffer);

    let admission = match service.admit(tx) {
        Ok(admission) => admission,
        Err(e) => {
            reject(&mut socket, e).await;
            return;
        }
    };

    let id = admission.id;
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_loop(
        sink,
        rx,
        admission.terminate.clone(),
        service.clone(),
        id,
    ));

    read_loop(stream, &service, id, &admission.terminate).await;

    service.disconnect(id);
    if let Err(e) = writer.await {
        tracing::warn!(connection_id = %id, error = %e, "Socket writer task failed");
    }
    tracing::debug!(connection_id = %id, "Socket closed");
}

async fn reject(socket: &mut WebSocket, error: AdmissionError) {
    tracing::debug!(error = %error, "Closing rejected socket");
    let frame = match error {
        AdmissionError::AtCapacity { .. } => CloseFrame {
            code: close_code::AGAIN,
            reason: OVERLOADED_REASON.into(),
        },
        AdmissionError::ShuttingDown => CloseFrame {
            code: close_code::AWAY,
            reason: "server shutting down".into(),
        },
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
}

/// Drain the outbound queue into the socket until the connection is
/// terminated or the socket fails.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    terminate: CancellationToken,
    service: FanoutService,
    id: ConnectionId,
) {
    loop {
        tokio::select! {
            biased;

            () = terminate.cancelled() => {
                while let Ok(outbound) = rx.try_recv() {
                    if write_frame(&mut sink, outbound).await.is_err() {
                        break;
                    }
                }
                if let Err(e) = sink.send(Message::Close(None)).await {
                    tracing::debug!(connection_id = %id, error = %e, "Close frame not sent");
                }
                return;
            }

            outbound = rx.recv() => {
                let Some(outbound) = outbound else {
                    return;
                };
                if let Err(e) = write_frame(&mut sink, outbound).await {
                    tracing::debug!(connection_id = %id, error = %e, "Socket write failed");
                    service.disconnect(id);
                    return;
                }
            }
        }
    }
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    outbound: Outbound,
) -> Result<(), axum::Error> {
    let frame = match outbound {
        Outbound::Message(message) => match serde_json::to_string(&message) {
            Ok(json) => Message::Text(json.into()),
            Err(e) => {
                tracing::error!(kind = message.kind(), error = %e, "Failed to serialize message");
                return Ok(());
            }
        },
        Outbound::Ping => Message::Ping(Bytes::new()),
    };
    sink.send(frame).await
}

/// Feed inbound frames to the service until the client leaves or the
/// connection is terminated.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    service: &FanoutService,
    id: ConnectionId,
    terminate: &CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = terminate.cancelled() => return,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => service.handle_client_message(id, text.as_str()),
            Some(Ok(Message::Binary(_))) => {
                service.reject_message(id, &ProtocolError::UnsupportedFrame);
            }
            Some(Ok(Message::Pong(_))) => service.record_pong(id),
            // Transport pings are answered by the socket itself
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(e)) => {
                tracing::debug!(connection_id = %id, error = %e, "Socket read failed");
                return;
            }
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// WebSocket server.
pub struct WebSocketServer {
    port: u16,
    service: FanoutService,
    max_message_bytes: usize,
    cancel: CancellationToken,
}

impl WebSocketServer {
    /// Create a new WebSocket server.
    #[must_use]
    pub const fn new(
        port: u16,
        service: FanoutService,
        max_message_bytes: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            service,
            max_message_bytes,
            cancel,
        }
    }

    /// Bind and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server stops with an
    /// I/O error.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already-bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ServerFailed` if the server stops with an I/O
    /// error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener
            .local_addr()
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;
        tracing::info!(addr = %local, path = "/ws", "WebSocket server listening");

        let app = router(self.service, self.max_message_bytes);
        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("WebSocket server stopped");
        Ok(())
    }
}

/// WebSocket server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
