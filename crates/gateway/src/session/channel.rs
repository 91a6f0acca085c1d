//! One-shot channel requests.
//!
//! Exec and fetch each open their own channel on the session's connection
//! and deliver exactly one result. They never affect the shell or the
//! session state.

use crate::ssh::{ChannelKind, CommandOutput, RemoteConnection, SshError};

/// A request served on a dedicated channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OneShot {
    Exec { command: String },
    Fetch { path: String },
}

/// The single result of a [`OneShot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OneShotOutput {
    Command(CommandOutput),
    File(Vec<u8>),
}

impl OneShot {
    pub fn kind(&self) -> ChannelKind {
        match self {
            OneShot::Exec { .. } => ChannelKind::Exec,
            OneShot::Fetch { .. } => ChannelKind::Fetch,
        }
    }

    /// Run the request on `conn`.
    pub async fn run<R: RemoteConnection>(self, conn: &R) -> Result<OneShotOutput, SshError> {
        match self {
            OneShot::Exec { command } => conn.exec(&command).await.map(OneShotOutput::Command),
            OneShot::Fetch { path } => conn.read_file(&path).await.map(OneShotOutput::File),
        }
    }
}
