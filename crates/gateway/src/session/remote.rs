//! The remote session actor.
//!
//! Each session runs as one task that owns the connection, the shell channel
//! and the keepalive timer. A cloneable [`RemoteSession`] handle sends it
//! commands; state is published on a `watch` channel and events go to a
//! single subscriber in order.
//!
//! ```text
//! Connecting ──▶ Ready ──▶ Closing ──▶ Closed
//!      │           │                     ▲
//!      └───────────┴── error / remote ───┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::channel::{OneShot, OneShotOutput};
use super::keepalive::{KeepaliveDriver, KEEPALIVE_PROBE};
use super::{SessionError, SessionEvent, SessionId, SessionState};
use crate::config::SshConfig;
use crate::ssh::{
    ChannelKind, CommandOutput, Connector, Credentials, PtyRequest, RemoteConnection,
    ShellChannel, SshError, WindowSize,
};

/// Buffered commands per session.
const COMMAND_BUFFER: usize = 64;

/// Buffered events per session.
const EVENT_BUFFER: usize = 256;

/// How long a terminal event may wait for a slow subscriber.
const TERMINAL_EVENT_TIMEOUT: Duration = Duration::from_secs(5);

type ShellOf<C> = <<C as Connector>::Connection as RemoteConnection>::Shell;
type OneShotReply = oneshot::Sender<Result<OneShotOutput, SessionError>>;
type RequestId = u64;

/// Per-session settings derived from [`SshConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub ready_timeout: Duration,
    pub keepalive_period: Duration,
    pub pty: PtyRequest,
}

impl SessionOptions {
    pub fn from_config(ssh: &SshConfig) -> Self {
        Self {
            ready_timeout: ssh.ready_timeout(),
            keepalive_period: ssh.shell_keepalive(),
            pty: PtyRequest {
                term: ssh.term.clone(),
                size: WindowSize {
                    cols: ssh.initial_cols,
                    rows: ssh.initial_rows,
                },
            },
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&SshConfig::default())
    }
}

enum Command {
    Write(Bytes),
    Resize(WindowSize),
    OneShot {
        request: OneShot,
        reply: OneShotReply,
    },
}

/// Handle to a running session. Cheap to clone.
#[derive(Clone)]
pub struct RemoteSession {
    id: SessionId,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl RemoteSession {
    /// Start connecting and return the handle with its event stream.
    pub fn spawn<C: Connector>(
        connector: Arc<C>,
        credentials: Credentials,
        options: SessionOptions,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let id = Uuid::new_v4().to_string();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let cancel = CancellationToken::new();

        tracing::info!(
            session_id = %id,
            host = credentials.host(),
            port = credentials.port(),
            username = credentials.username(),
            "Connecting remote session"
        );

        let actor = SessionActor {
            id: id.clone(),
            connector,
            keepalive: KeepaliveDriver::new(options.keepalive_period),
            credentials,
            options,
            commands: command_rx,
            state: state_tx,
            events: event_tx,
            cancel: cancel.clone(),
            next_request: 0,
        };
        tokio::spawn(actor.run());

        let session = Self {
            id,
            commands: command_tx,
            state: state_rx,
            cancel,
        };
        (session, event_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Send bytes to the shell. Dropped unless the session is ready.
    pub async fn write(&self, data: Bytes) {
        if self.is_ready() {
            let _ = self.commands.send(Command::Write(data)).await;
        }
    }

    /// Change the shell window size. Dropped unless the session is ready.
    pub async fn resize(&self, size: WindowSize) {
        if self.is_ready() {
            let _ = self.commands.send(Command::Resize(size)).await;
        }
    }

    /// Run a command on its own channel.
    pub async fn execute(&self, command: impl Into<String>) -> Result<CommandOutput, SessionError> {
        let request = OneShot::Exec {
            command: command.into(),
        };
        match self.one_shot(request).await? {
            OneShotOutput::Command(output) => Ok(output),
            OneShotOutput::File(_) => Err(SessionError::NotConnected),
        }
    }

    /// Read a remote file over its own SFTP channel.
    pub async fn fetch_file(&self, path: impl Into<String>) -> Result<Vec<u8>, SessionError> {
        let request = OneShot::Fetch { path: path.into() };
        match self.one_shot(request).await? {
            OneShotOutput::File(content) => Ok(content),
            OneShotOutput::Command(_) => Err(SessionError::NotConnected),
        }
    }

    async fn one_shot(&self, request: OneShot) -> Result<OneShotOutput, SessionError> {
        if !self.is_ready() {
            return Err(SessionError::NotConnected);
        }
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::OneShot { request, reply })
            .await
            .map_err(|_| SessionError::NotConnected)?;
        result.await.map_err(|_| SessionError::NotConnected)?
    }

    /// Begin graceful teardown. Returns immediately; idempotent.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Wait until the session has reached `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }
}

enum Outcome {
    Disconnected,
    RemoteClosed,
    Failed(SshError),
}

struct SessionActor<C: Connector> {
    id: SessionId,
    connector: Arc<C>,
    credentials: Credentials,
    options: SessionOptions,
    keepalive: KeepaliveDriver,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<SessionState>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    next_request: RequestId,
}

impl<C: Connector> SessionActor<C> {
    async fn run(mut self) {
        let (conn, mut shell) = match self.establish().await {
            Some(Ok(established)) => established,
            Some(Err(err)) => {
                if err.is_auth_failure() {
                    tracing::info!(session_id = %self.id, error = %err, "Remote host rejected the session");
                } else {
                    tracing::warn!(session_id = %self.id, error = %err, "Remote session failed to start");
                }
                self.emit_terminal(SessionEvent::Error(err)).await;
                self.finish().await;
                return;
            }
            None => {
                tracing::info!(session_id = %self.id, "Remote session cancelled while connecting");
                self.finish().await;
                return;
            }
        };

        self.state.send_replace(SessionState::Ready);
        self.keepalive.start();
        tracing::info!(session_id = %self.id, host = self.credentials.host(), "Remote session ready");
        self.emit_data(SessionEvent::Ready).await;

        let mut in_flight = JoinSet::new();
        let outcome = self.serve(&conn, &mut shell, &mut in_flight).await;

        match &outcome {
            Outcome::Disconnected => {
                self.state.send_replace(SessionState::Closing);
                tracing::info!(session_id = %self.id, "Disconnecting remote session");
            }
            Outcome::RemoteClosed => {
                tracing::info!(session_id = %self.id, "Remote closed the shell");
            }
            Outcome::Failed(err) => {
                tracing::warn!(session_id = %self.id, error = %err, "Remote session failed");
            }
        }

        self.keepalive.stop();
        shell.close().await;
        if !in_flight.is_empty() {
            tracing::debug!(
                session_id = %self.id,
                count = in_flight.len(),
                "Detaching in-flight requests"
            );
        }
        in_flight.detach_all();
        conn.disconnect().await;
        drop(shell);

        if let Outcome::Failed(err) = outcome {
            self.emit_terminal(SessionEvent::Error(err)).await;
        }
        self.finish().await;
    }

    /// Connect, authenticate and open the shell within the ready timeout.
    /// `None` when cancelled first.
    async fn establish(
        &self,
    ) -> Option<Result<(Arc<C::Connection>, ShellOf<C>), SshError>> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = self.connect_and_open() => Some(result),
        }
    }

    async fn connect_and_open(&self) -> Result<(Arc<C::Connection>, ShellOf<C>), SshError> {
        let limit = self.options.ready_timeout;
        let deadline = Instant::now() + limit;

        let conn = timeout_at(deadline, self.connector.connect(&self.credentials))
            .await
            .map_err(|_| SshError::Timeout(limit))??;

        match timeout_at(deadline, conn.open_shell(&self.options.pty)).await {
            Ok(Ok(shell)) => Ok((Arc::new(conn), shell)),
            Ok(Err(err)) => {
                conn.disconnect().await;
                Err(err)
            }
            Err(_) => {
                conn.disconnect().await;
                Err(SshError::Timeout(limit))
            }
        }
    }

    async fn serve(
        &mut self,
        conn: &Arc<C::Connection>,
        shell: &mut ShellOf<C>,
        in_flight: &mut JoinSet<(RequestId, ChannelKind, bool)>,
    ) -> Outcome {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Outcome::Disconnected,

                command = self.commands.recv() => match command {
                    Some(Command::Write(data)) => {
                        if let Err(err) = shell.write(&data).await {
                            return Outcome::Failed(err);
                        }
                    }
                    Some(Command::Resize(size)) => {
                        if let Err(err) = shell.resize(size).await {
                            return Outcome::Failed(err);
                        }
                    }
                    Some(Command::OneShot { request, reply }) => {
                        self.spawn_one_shot(conn, request, reply, in_flight);
                    }
                    None => return Outcome::Disconnected,
                },

                chunk = shell.next_chunk() => match chunk {
                    Some(Ok(data)) => {
                        if !self.emit_data(SessionEvent::Data(data)).await {
                            return Outcome::Disconnected;
                        }
                    }
                    Some(Err(err)) => return Outcome::Failed(err),
                    None => return Outcome::RemoteClosed,
                },

                _ = self.keepalive.tick() => {
                    if *self.state.borrow() == SessionState::Ready {
                        if let Err(err) = shell.write(KEEPALIVE_PROBE).await {
                            return Outcome::Failed(err);
                        }
                    }
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Ok((request_id, kind, ok)) = joined {
                        tracing::debug!(
                            session_id = %self.id,
                            request_id,
                            kind = %kind,
                            ok,
                            "One-shot request finished"
                        );
                    }
                }
            }
        }
    }

    fn spawn_one_shot(
        &mut self,
        conn: &Arc<C::Connection>,
        request: OneShot,
        reply: OneShotReply,
        in_flight: &mut JoinSet<(RequestId, ChannelKind, bool)>,
    ) {
        self.next_request += 1;
        let request_id = self.next_request;
        let kind = request.kind();
        let conn = Arc::clone(conn);

        tracing::debug!(session_id = %self.id, request_id, kind = %kind, "Opening one-shot channel");

        in_flight.spawn(async move {
            let result = request.run(conn.as_ref()).await;
            let ok = result.is_ok();
            let _ = reply.send(result.map_err(SessionError::from));
            (request_id, kind, ok)
        });
    }

    /// Deliver an event, giving up if the session is being torn down.
    /// Returns `false` once teardown has been requested.
    async fn emit_data(&self, event: SessionEvent) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = self.events.send(event) => true,
        }
    }

    async fn emit_terminal(&self, event: SessionEvent) {
        let _ = self
            .events
            .send_timeout(event, TERMINAL_EVENT_TIMEOUT)
            .await;
    }

    /// Enter `Closed`, fail queued requests and publish the final event.
    async fn finish(&mut self) {
        self.keepalive.stop();
        self.commands.close();
        while self.commands.try_recv().is_ok() {}
        self.state.send_replace(SessionState::Closed);
        tracing::info!(session_id = %self.id, "Remote session closed");
        self.emit_terminal(SessionEvent::Closed).await;
    }
}
