//! Message catalogue exchanged between the browser and the gateway.
//!
//! Every message except raw terminal bytes travels as a JSON text frame with
//! a kebab-case `type` tag and camelCase fields:
//!
//! ```json
//! {"type":"connect","host":"example.org","username":"deploy","password":"..."}
//! {"type":"command-result","output":"hi\n","errorOutput":"","exitCode":0,"signal":null}
//! ```
//!
//! Terminal bytes use binary frames in both directions (see [`crate::codec`]).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Messages sent by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Open a remote session, replacing any existing one.
    Connect(ConnectRequest),
    /// Keystrokes for the interactive shell.
    Input(Input),
    /// Raw keystrokes received as a binary frame.
    #[serde(skip)]
    InputBytes(Bytes),
    /// Terminal window size change.
    Resize(Resize),
    /// Run a one-shot command on its own channel.
    Execute(Execute),
    /// Read a remote file over SFTP.
    Fetch(Fetch),
    /// Tear the session down.
    Disconnect,
    /// Application-level liveness probe.
    Ping,
}

/// Messages sent to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// The shell channel is open.
    Ready,
    /// Shell output, sent as a binary frame.
    #[serde(skip)]
    Data(Bytes),
    /// A session-level failure. Followed by `closed`.
    Error(ErrorMessage),
    /// The session reached its terminal state.
    Closed,
    /// Outcome of an `execute` request.
    CommandResult(CommandResult),
    /// Contents of a fetched file.
    FetchResult(FetchResult),
    /// A fetch that could not be completed.
    FetchError(FetchError),
    /// Reply to `ping`.
    Pong,
}

impl ServerMessage {
    /// Shorthand for an [`ServerMessage::Error`] with the given text.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorMessage {
            message: message.into(),
        })
    }
}

// ============================================================================
// Client payloads
// ============================================================================

/// Credentials and target for a new session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Remote host name or address.
    pub host: String,
    /// Remote port; the gateway default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Login name.
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// PEM/OpenSSH encoded private key. Takes precedence over `password`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Keystrokes as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub data: String,
}

/// New terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resize {
    pub cols: u32,
    pub rows: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execute {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fetch {
    pub path: String,
}

// ============================================================================
// Server payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// Full output of a one-shot command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    /// Everything the command wrote to stdout.
    pub output: String,
    /// Everything the command wrote to stderr.
    pub error_output: String,
    /// Exit status, absent when the command was killed by a signal.
    pub exit_code: Option<u32>,
    /// Name of the terminating signal, if any.
    pub signal: Option<String>,
}

impl CommandResult {
    /// A failed result that never reached the remote side.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error_output: message.into(),
            exit_code: Some(1),
            signal: None,
        }
    }
}

/// A fetched file. `content` is standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    pub path: String,
    pub content: String,
}

impl FetchResult {
    /// Encode raw file bytes for transport.
    pub fn from_bytes(path: impl Into<String>, content: &[u8]) -> Self {
        Self {
            path: path.into(),
            content: STANDARD.encode(content),
        }
    }

    /// Decode the file bytes.
    pub fn decode_content(&self) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(&self.content)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchError {
    pub path: String,
    pub message: String,
}
