//! Per-client message relay.
//!
//! A [`ClientRelay`] binds one browser connection to one client id. It turns
//! inbound [`ClientMessage`]s into session operations and session events into
//! outbound [`ServerMessage`]s. It knows nothing about WebSockets; the server
//! feeds it decoded messages over channels.

use std::sync::Arc;

use bytes::Bytes;
use protocol::{ClientMessage, CommandResult, FetchError, FetchResult, ServerMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::session::{ClientId, RemoteSession, SessionError, SessionEvent, SessionRegistry};
use crate::ssh::{CommandOutput, Connector, Credentials, WindowSize};

/// Outbound channel is gone; the transport has shut down.
#[derive(Debug)]
struct TransportClosed;

type RelayResult = Result<(), TransportClosed>;

/// The session this relay currently forwards events from.
struct Attached {
    session: RemoteSession,
    events: mpsc::Receiver<SessionEvent>,
}

/// Relay between one browser connection and its remote session.
pub struct ClientRelay<C: Connector> {
    client_id: ClientId,
    registry: Arc<SessionRegistry<C>>,
    outbound: mpsc::Sender<ServerMessage>,
    default_port: u16,
}

impl<C: Connector> ClientRelay<C> {
    pub fn new(
        client_id: ClientId,
        registry: Arc<SessionRegistry<C>>,
        outbound: mpsc::Sender<ServerMessage>,
        default_port: u16,
    ) -> Self {
        Self {
            client_id,
            registry,
            outbound,
            default_port,
        }
    }

    /// Relay until the inbound stream ends, the outbound side closes or
    /// `shutdown` fires.
    ///
    /// The client's session is closed on return, except on shutdown where
    /// [`SessionRegistry::shutdown`] tears every session down.
    pub async fn run(self, mut inbound: mpsc::Receiver<ClientMessage>, shutdown: CancellationToken) {
        let mut attached: Option<Attached> = None;

        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(client_id = %self.client_id, "Relay stopped by shutdown");
                    return;
                }

                message = inbound.recv() => match message {
                    Some(message) => self.dispatch(message, &mut attached).await,
                    None => break,
                },

                event = next_event(&mut attached) => self.forward(event, &mut attached).await,
            };

            if result.is_err() {
                break;
            }
        }

        tracing::debug!(client_id = %self.client_id, "Relay finished");
        self.registry.close(&self.client_id);
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    async fn dispatch(
        &self,
        message: ClientMessage,
        attached: &mut Option<Attached>,
    ) -> RelayResult {
        match message {
            ClientMessage::Connect(request) => {
                // Events of a replaced session are no longer forwarded.
                *attached = None;
                match Credentials::from_request(request, self.default_port) {
                    Ok(credentials) => {
                        let (session, events) = self.registry.open(&self.client_id, credentials);
                        tracing::debug!(
                            client_id = %self.client_id,
                            session_id = %session.id(),
                            "Attached to new session"
                        );
                        *attached = Some(Attached { session, events });
                    }
                    Err(err) => {
                        tracing::debug!(client_id = %self.client_id, error = %err, "Rejected connect request");
                        self.registry.close(&self.client_id);
                        self.send(ServerMessage::error(SessionError::from(err).to_string()))
                            .await?;
                        self.send(ServerMessage::Closed).await?;
                    }
                }
            }

            ClientMessage::Input(input) => {
                self.write(attached, Bytes::from(input.data.into_bytes())).await;
            }

            ClientMessage::InputBytes(data) => self.write(attached, data).await,

            ClientMessage::Resize(resize) => {
                if resize.cols == 0 || resize.rows == 0 {
                    tracing::debug!(client_id = %self.client_id, "Ignoring zero-sized resize");
                } else if let Some(current) = attached.as_ref() {
                    current
                        .session
                        .resize(WindowSize {
                            cols: resize.cols,
                            rows: resize.rows,
                        })
                        .await;
                }
            }

            ClientMessage::Execute(execute) => {
                let outbound = self.outbound.clone();
                match self.registry.get(&self.client_id) {
                    Some(session) => {
                        tokio::spawn(async move {
                            let result = session.execute(execute.command).await;
                            let _ = outbound.send(command_result(result)).await;
                        });
                    }
                    None => {
                        self.send(command_result(Err(SessionError::NotConnected)))
                            .await?
                    }
                }
            }

            ClientMessage::Fetch(fetch) => {
                let outbound = self.outbound.clone();
                match self.registry.get(&self.client_id) {
                    Some(session) => {
                        tokio::spawn(async move {
                            let result = session.fetch_file(fetch.path.clone()).await;
                            let _ = outbound.send(fetch_reply(fetch.path, result)).await;
                        });
                    }
                    None => {
                        self.send(fetch_reply(fetch.path, Err(SessionError::NotConnected)))
                            .await?
                    }
                }
            }

            ClientMessage::Disconnect => {
                // The session reports `closed` through its event stream.
                self.registry.close(&self.client_id);
            }

            ClientMessage::Ping => self.send(ServerMessage::Pong).await?,
        }
        Ok(())
    }

    async fn write(&self, attached: &Option<Attached>, data: Bytes) {
        if let Some(current) = attached.as_ref() {
            current.session.write(data).await;
        }
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    async fn forward(
        &self,
        event: Option<SessionEvent>,
        attached: &mut Option<Attached>,
    ) -> RelayResult {
        match event {
            Some(SessionEvent::Ready) => self.send(ServerMessage::Ready).await,
            Some(SessionEvent::Data(data)) => self.send(ServerMessage::Data(data)).await,
            Some(SessionEvent::Error(err)) => {
                self.send(ServerMessage::error(err.to_string())).await
            }
            // A stream that ends without `Closed` lost its final event; the
            // session is gone either way.
            Some(SessionEvent::Closed) | None => {
                if let Some(current) = attached.take() {
                    self.registry
                        .remove_if_current(&self.client_id, current.session.id());
                }
                self.send(ServerMessage::Closed).await
            }
        }
    }

    async fn send(&self, message: ServerMessage) -> RelayResult {
        self.outbound
            .send(message)
            .await
            .map_err(|_| TransportClosed)
    }
}

/// Next event of the attached session; pending forever when detached.
async fn next_event(attached: &mut Option<Attached>) -> Option<SessionEvent> {
    match attached.as_mut() {
        Some(current) => current.events.recv().await,
        None => std::future::pending().await,
    }
}

fn command_result(result: Result<CommandOutput, SessionError>) -> ServerMessage {
    let result = match result {
        Ok(output) => CommandResult {
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
            error_output: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.exit_code,
            signal: output.signal,
        },
        Err(err) => CommandResult::failure(err.to_string()),
    };
    ServerMessage::CommandResult(result)
}

fn fetch_reply(path: String, result: Result<Vec<u8>, SessionError>) -> ServerMessage {
    match result {
        Ok(content) => ServerMessage::FetchResult(FetchResult::from_bytes(path, &content)),
        Err(err) => ServerMessage::FetchError(FetchError {
            path,
            message: err.to_string(),
        }),
    }
}
