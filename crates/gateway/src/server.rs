//! HTTP and WebSocket front end.
//!
//! | route | purpose |
//! |-------|---------|
//! | `GET /ws` | browser session transport, one relay per connection |
//! | `GET /health` | liveness and live session count |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use protocol::{codec, ClientMessage, Frame, ServerMessage, MAX_TEXT_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::relay::ClientRelay;
use crate::session::SessionRegistry;
use crate::ssh::Connector;

/// Buffered outbound messages per client.
const OUTBOUND_BUFFER: usize = 256;

/// Buffered inbound messages per client.
const INBOUND_BUFFER: usize = 64;

/// Largest accepted WebSocket message.
const MAX_MESSAGE_SIZE: usize = 4 * MAX_TEXT_FRAME_SIZE;

/// How long queued outbound messages may take to flush after the relay ends.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Shared state of all HTTP handlers.
pub struct AppState<C: Connector> {
    pub registry: Arc<SessionRegistry<C>>,
    pub default_port: u16,
    pub shutdown: CancellationToken,
}

impl<C: Connector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            default_port: self.default_port,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub active_sessions: usize,
    /// RFC 3339 time of the response.
    pub timestamp: String,
}

pub fn router<C: Connector>(state: AppState<C>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::<C>))
        .route("/health", get(health_handler::<C>))
        .with_state(state)
}

/// A bound gateway server.
pub struct GatewayServer<C: Connector> {
    listener: TcpListener,
    state: AppState<C>,
}

impl<C: Connector> GatewayServer<C> {
    pub async fn bind(addr: SocketAddr, state: AppState<C>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Serve until the shutdown token fires, then disconnect every session.
    pub async fn run(self) -> Result<()> {
        let shutdown = self.state.shutdown.clone();
        let registry = Arc::clone(&self.state.registry);
        tracing::info!(addr = %self.local_addr()?, "Gateway listening");

        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .context("HTTP server failed")?;

        registry.shutdown().await;
        tracing::info!("Gateway stopped");
        Ok(())
    }
}

async fn health_handler<C: Connector>(State(state): State<AppState<C>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        active_sessions: state.registry.len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn ws_handler<C: Connector>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<C>>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket<C: Connector>(socket: WebSocket, state: AppState<C>) {
    let client_id = Uuid::new_v4().to_string();
    tracing::info!(client_id = %client_id, "Client connected");

    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);
    let (inbound_tx, inbound_rx) = mpsc::channel::<ClientMessage>(INBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let frame = match codec::encode_server(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Failed to encode outbound message: {}", e);
                    continue;
                }
            };
            let ws_message = match frame {
                Frame::Text(text) => Message::Text(text.into()),
                Frame::Binary(bytes) => Message::Binary(bytes.into()),
            };
            if sink.send(ws_message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let errors = outbound_tx.clone();
    let reader_id = client_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            let frame = match message {
                Message::Text(text) => Frame::Text(text.as_str().to_owned()),
                Message::Binary(data) => Frame::Binary(Bytes::from(data)),
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            match codec::decode_client(frame) {
                Ok(message) => {
                    if inbound_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(client_id = %reader_id, error = %e, "Rejected inbound frame");
                    let reply = ServerMessage::error(format!("invalid message: {}", e));
                    if errors.send(reply).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let relay = ClientRelay::new(
        client_id.clone(),
        state.registry,
        outbound_tx,
        state.default_port,
    );
    relay.run(inbound_rx, state.shutdown).await;

    reader.abort();
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        tracing::debug!(client_id = %client_id, "Outbound writer did not drain in time");
    }
    tracing::info!(client_id = %client_id, "Client disconnected");
}
