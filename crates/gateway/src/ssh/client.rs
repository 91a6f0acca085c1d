//! russh-backed implementation of the connection traits.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use russh::client::{self, DisconnectReason, Handle, Msg};
use russh::keys::{decode_secret_key, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelMsg, Disconnect, Sig};
use russh_sftp::client::SftpSession;
use tokio::sync::watch;

use super::{
    AuthMethod, ChannelKind, CommandOutput, Connector, Credentials, PtyRequest, RemoteConnection,
    ShellChannel, SshError, WindowSize,
};
use crate::config::SshConfig;

/// How long a channel whose stream ended waits for the transport to report why.
const LINK_END_GRACE: Duration = Duration::from_secs(1);

/// How the transport of a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkEnd {
    /// The server sent a disconnect message.
    Remote,
    /// The transport failed, including keepalive timeouts.
    Failed(String),
}

/// Watches the transport of one connection.
#[derive(Clone)]
struct Link(watch::Receiver<Option<LinkEnd>>);

impl Link {
    fn new() -> (watch::Sender<Option<LinkEnd>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self(rx))
    }

    /// Error to report for a channel whose stream ended without a close.
    ///
    /// russh drops channels before it tells the handler why, so this waits
    /// briefly for the reason. `None` means the server ended the connection.
    async fn end_error(&self) -> Option<SshError> {
        let end = {
            let mut link = self.0.clone();
            let end = match tokio::time::timeout(LINK_END_GRACE, link.wait_for(Option::is_some)).await {
                Ok(Ok(end)) => (*end).clone(),
                _ => None,
            };
            end
        };
        classify_end(end)
    }
}

fn classify_end(end: Option<LinkEnd>) -> Option<SshError> {
    match end {
        Some(LinkEnd::Remote) => None,
        Some(LinkEnd::Failed(reason)) => Some(SshError::ConnectionLost(reason)),
        None => Some(SshError::ConnectionLost(
            "transport closed without a reason".to_string(),
        )),
    }
}

/// Client event handler. Host keys are accepted without verification.
pub struct ClientHandler {
    link: watch::Sender<Option<LinkEnd>>,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            algorithm = server_public_key.algorithm().as_str(),
            "Accepting server host key"
        );
        Ok(true)
    }

    async fn disconnected(
        &mut self,
        reason: DisconnectReason<Self::Error>,
    ) -> Result<(), Self::Error> {
        match reason {
            DisconnectReason::ReceivedDisconnect(_) => {
                tracing::debug!("Server closed the connection");
                self.link.send_replace(Some(LinkEnd::Remote));
                Ok(())
            }
            DisconnectReason::Error(e) => {
                tracing::debug!(error = %e, "SSH transport failed");
                self.link.send_replace(Some(LinkEnd::Failed(e.to_string())));
                Err(e)
            }
        }
    }
}

/// Opens russh client connections.
#[derive(Clone)]
pub struct RusshConnector {
    config: Arc<client::Config>,
}

impl RusshConnector {
    pub fn new(ssh: &SshConfig) -> Self {
        let config = client::Config {
            keepalive_interval: Some(ssh.transport_keepalive()),
            keepalive_max: ssh.transport_keepalive_max,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

impl Connector for RusshConnector {
    type Connection = RusshConnection;

    async fn connect(&self, credentials: &Credentials) -> Result<RusshConnection, SshError> {
        let (link_tx, link) = Link::new();
        let mut handle = client::connect(
            self.config.clone(),
            (credentials.host(), credentials.port()),
            ClientHandler { link: link_tx },
        )
        .await
        .map_err(|e| SshError::Connect(e.to_string()))?;

        let result = match credentials.auth() {
            AuthMethod::Password(password) => {
                handle
                    .authenticate_password(credentials.username(), password.as_str())
                    .await
            }
            AuthMethod::PrivateKey { pem, passphrase } => {
                let key = decode_secret_key(pem, passphrase.as_deref())
                    .map_err(|e| SshError::InvalidKey(e.to_string()))?;
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|e| SshError::Connect(e.to_string()))?
                    .flatten();
                handle
                    .authenticate_publickey(
                        credentials.username(),
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
            }
        }
        .map_err(|e| SshError::Connect(e.to_string()))?;

        if !result.success() {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(SshError::AuthRejected);
        }

        tracing::debug!(
            host = credentials.host(),
            port = credentials.port(),
            username = credentials.username(),
            "Authenticated"
        );

        Ok(RusshConnection { handle, link })
    }
}

/// An authenticated russh client connection.
pub struct RusshConnection {
    handle: Handle<ClientHandler>,
    link: Link,
}

impl RusshConnection {
    async fn open_channel(&self, kind: ChannelKind) -> Result<Channel<Msg>, SshError> {
        if self.handle.is_closed() {
            return Err(self.link.end_error().await.unwrap_or(SshError::Disconnected));
        }
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::channel_open(kind, e))
    }
}

impl RemoteConnection for RusshConnection {
    type Shell = RusshShell;

    async fn open_shell(&self, pty: &PtyRequest) -> Result<RusshShell, SshError> {
        let channel = self.open_channel(ChannelKind::Shell).await?;
        channel
            .request_pty(false, &pty.term, pty.size.cols, pty.size.rows, 0, 0, &[])
            .await
            .map_err(|e| SshError::channel_open(ChannelKind::Shell, e))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| SshError::channel_open(ChannelKind::Shell, e))?;

        let mut shell = RusshShell {
            channel,
            link: self.link.clone(),
            pending: VecDeque::new(),
            closed: false,
        };
        shell.wait_started().await?;
        Ok(shell)
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        let mut channel = self.open_channel(ChannelKind::Exec).await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::channel(ChannelKind::Exec, e))?;

        let mut output = CommandOutput::default();
        let mut finished = false;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => {
                    output.stderr.extend_from_slice(&data)
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    output.exit_code = Some(exit_status);
                    finished = true;
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    output.signal = Some(signal_label(&signal_name));
                    finished = true;
                }
                ChannelMsg::Failure => {
                    return Err(SshError::channel_open(
                        ChannelKind::Exec,
                        "exec request refused",
                    ))
                }
                ChannelMsg::Close => {
                    finished = true;
                    break;
                }
                _ => {}
            }
        }

        if !finished {
            return Err(self.link.end_error().await.unwrap_or(SshError::Disconnected));
        }
        Ok(output)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SshError> {
        let channel = self.open_channel(ChannelKind::Fetch).await?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| SshError::channel_open(ChannelKind::Fetch, e))?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::channel_open(ChannelKind::Fetch, e))?;
        let result = sftp
            .read(path)
            .await
            .map_err(|e| SshError::channel(ChannelKind::Fetch, e));
        let _ = sftp.close().await;
        result
    }

    async fn disconnect(&self) {
        if self.handle.is_closed() {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("Disconnect failed: {}", e);
        }
    }
}

/// The interactive shell channel of a [`RusshConnection`].
pub struct RusshShell {
    channel: Channel<Msg>,
    link: Link,
    /// Output that arrived before the shell request was confirmed.
    pending: VecDeque<Bytes>,
    closed: bool,
}

impl RusshShell {
    async fn wait_started(&mut self) -> Result<(), SshError> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => {
                    return Err(SshError::channel_open(
                        ChannelKind::Shell,
                        "shell request refused",
                    ))
                }
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    self.pending.push_back(Bytes::copy_from_slice(&data));
                }
                Some(ChannelMsg::Close) => {
                    self.closed = true;
                    return Err(SshError::channel_open(
                        ChannelKind::Shell,
                        "channel closed before the shell started",
                    ));
                }
                None => {
                    self.closed = true;
                    return Err(self.link.end_error().await.unwrap_or_else(|| {
                        SshError::channel_open(ChannelKind::Shell, "server closed the connection")
                    }));
                }
                Some(_) => {}
            }
        }
    }
}

impl ShellChannel for RusshShell {
    async fn write(&mut self, data: &[u8]) -> Result<(), SshError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| SshError::channel(ChannelKind::Shell, e))
    }

    async fn resize(&mut self, size: WindowSize) -> Result<(), SshError> {
        self.channel
            .window_change(size.cols, size.rows, 0, 0)
            .await
            .map_err(|e| SshError::channel(ChannelKind::Shell, e))
    }

    async fn next_chunk(&mut self) -> Option<Result<Bytes, SshError>> {
        if let Some(chunk) = self.pending.pop_front() {
            return Some(Ok(chunk));
        }
        if self.closed {
            return None;
        }
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return Some(Ok(Bytes::copy_from_slice(&data)));
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    tracing::debug!(exit_status, "Remote shell exited");
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) => {
                    self.closed = true;
                    return None;
                }
                // The stream ended without a close: the transport went away.
                None => {
                    self.closed = true;
                    return self.link.end_error().await.map(Err);
                }
                Some(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.channel.eof().await;
        let _ = self.channel.close().await;
    }
}

fn signal_label(signal: &Sig) -> String {
    match signal {
        Sig::Custom(name) => name.clone(),
        other => format!("{:?}", other),
    }
}
