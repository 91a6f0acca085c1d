//! Remote session management.
//!
//! A [`RemoteSession`] owns one authenticated connection and its interactive
//! shell. The [`SessionRegistry`] maps each browser client to at most one
//! live session and tears sessions down when they are replaced or abandoned.

pub mod channel;
pub mod keepalive;
pub mod registry;
pub mod remote;

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

use crate::ssh::{CredentialsError, SshError};

pub use channel::{OneShot, OneShotOutput};
pub use keepalive::{KeepaliveDriver, KEEPALIVE_PROBE};
pub use registry::SessionRegistry;
pub use remote::{RemoteSession, SessionOptions};

/// Unique identifier of a remote session.
pub type SessionId = String;

/// Identifier of a browser connection, assigned by the transport.
pub type ClientId = String;

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is not ready or has already closed.
    #[error("not connected")]
    NotConnected,

    /// The connect request could not be turned into credentials.
    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    /// The remote side failed the operation.
    #[error(transparent)]
    Ssh(#[from] SshError),
}

/// Lifecycle of a remote session. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Events published by a session to its single subscriber, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The shell channel is open.
    Ready,
    /// Shell output.
    Data(Bytes),
    /// A fatal failure. Always followed by `Closed`.
    Error(SshError),
    /// The session reached `Closed`. Last event.
    Closed,
}
