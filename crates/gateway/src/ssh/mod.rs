//! Remote connection layer.
//!
//! The session core talks to the remote host only through the traits in this
//! module. [`client::RusshConnector`] is the production implementation; tests
//! substitute an in-memory one.
//!
//! One [`RemoteConnection`] carries every channel of a session: a single
//! interactive shell plus any number of concurrent one-shot exec and SFTP
//! channels.

pub mod client;
pub mod credentials;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

pub use client::RusshConnector;
pub use credentials::{AuthMethod, Credentials, CredentialsError};

/// The three kinds of channel a session opens on its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// The interactive PTY shell.
    Shell,
    /// A one-shot command.
    Exec,
    /// An SFTP subsystem used to read one file.
    Fetch,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Shell => f.write_str("shell"),
            ChannelKind::Exec => f.write_str("exec"),
            ChannelKind::Fetch => f.write_str("fetch"),
        }
    }
}

/// Errors raised by the remote connection layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SshError {
    /// TCP connect or SSH transport handshake failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Handshake and shell open did not finish in time.
    #[error("timed out after {0:?} waiting for the remote host")]
    Timeout(Duration),

    /// The server refused the supplied credentials.
    #[error("authentication failed")]
    AuthRejected,

    /// The private key could not be decoded or decrypted.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// The server refused to open a channel.
    #[error("could not open {kind} channel: {reason}")]
    ChannelOpen {
        kind: ChannelKind,
        reason: String,
    },

    /// An open channel failed.
    #[error("{kind} channel error: {reason}")]
    Channel {
        kind: ChannelKind,
        reason: String,
    },

    /// The connection went away underneath an operation.
    #[error("connection lost")]
    Disconnected,

    /// The transport failed while the connection was up.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

impl SshError {
    /// Whether the failure happened before the session could be established.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            SshError::Connect(_)
                | SshError::Timeout(_)
                | SshError::AuthRejected
                | SshError::InvalidKey(_)
        )
    }

    pub(crate) fn channel(kind: ChannelKind, reason: impl fmt::Display) -> Self {
        SshError::Channel {
            kind,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn channel_open(kind: ChannelKind, reason: impl fmt::Display) -> Self {
        SshError::ChannelOpen {
            kind,
            reason: reason.to_string(),
        }
    }
}

/// Terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub cols: u32,
    pub rows: u32,
}

/// Parameters of the shell PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub size: WindowSize,
}

/// Everything a one-shot command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit status, absent when the command was killed by a signal.
    pub exit_code: Option<u32>,
    /// Terminating signal name, such as `TERM`.
    pub signal: Option<String>,
}

/// Opens authenticated connections.
pub trait Connector: Send + Sync + 'static {
    type Connection: RemoteConnection;

    /// Connect and authenticate. Private key auth is used whenever the
    /// credentials carry a key.
    fn connect(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Self::Connection, SshError>> + Send;
}

/// One authenticated connection to a remote host.
///
/// Methods take `&self` so exec and fetch can run concurrently with the
/// shell from separate tasks.
pub trait RemoteConnection: Send + Sync + 'static {
    type Shell: ShellChannel;

    /// Open the interactive shell with a PTY.
    fn open_shell(
        &self,
        pty: &PtyRequest,
    ) -> impl Future<Output = Result<Self::Shell, SshError>> + Send;

    /// Run `command` on a fresh channel and collect its output.
    fn exec(&self, command: &str)
        -> impl Future<Output = Result<CommandOutput, SshError>> + Send;

    /// Read the whole file at `path` over a fresh SFTP channel.
    fn read_file(&self, path: &str) -> impl Future<Output = Result<Vec<u8>, SshError>> + Send;

    /// Close the connection. Idempotent.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}

/// The interactive shell channel.
pub trait ShellChannel: Send + 'static {
    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<(), SshError>> + Send;

    fn resize(&mut self, size: WindowSize) -> impl Future<Output = Result<(), SshError>> + Send;

    /// Next chunk of output, stdout and stderr merged.
    ///
    /// `None` means the remote side closed the shell. Must be cancel safe:
    /// dropping the future before it resolves loses no output.
    fn next_chunk(&mut self) -> impl Future<Output = Option<Result<Bytes, SshError>>> + Send;

    /// Close the channel. Idempotent.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
