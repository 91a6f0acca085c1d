//! In-memory connection layer for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    ChannelKind, CommandOutput, Connector, Credentials, PtyRequest, RemoteConnection,
    ShellChannel, SshError, WindowSize,
};

/// Commands understood by [`MockConnection::exec`] that never return on their own.
pub const BLOCKING_COMMAND: &str = "tail -f /var/log/syslog";

#[derive(Debug, Clone)]
pub enum ConnectBehavior {
    Accept,
    Reject(SshError),
    /// Handshake never completes.
    Hang,
    /// Handshake completes after a delay.
    Delay(Duration),
    /// Authenticates but the shell channel is refused.
    RefuseShell,
}

enum ShellEvent {
    Data(Bytes),
    Error(SshError),
    Close,
}

/// Remote side of one mock connection, inspectable by tests.
pub struct MockRemote {
    pub credentials: Credentials,
    pub pty: Mutex<Option<PtyRequest>>,
    pub writes: Mutex<Vec<Vec<u8>>>,
    pub resizes: Mutex<Vec<WindowSize>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    shell_tx: mpsc::UnboundedSender<ShellEvent>,
    shell_rx: Mutex<Option<mpsc::UnboundedReceiver<ShellEvent>>>,
    /// Set when the transport failed rather than being closed by us.
    lost: Mutex<Option<SshError>>,
    write_failure: Mutex<Option<String>>,
    gone: CancellationToken,
}

impl MockRemote {
    fn new(credentials: Credentials) -> Self {
        let (shell_tx, shell_rx) = mpsc::unbounded_channel();
        Self {
            credentials,
            pty: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            shell_tx,
            shell_rx: Mutex::new(Some(shell_rx)),
            lost: Mutex::new(None),
            write_failure: Mutex::new(None),
            gone: CancellationToken::new(),
        }
    }

    pub fn emit(&self, data: &[u8]) {
        let _ = self.shell_tx.send(ShellEvent::Data(Bytes::copy_from_slice(data)));
    }

    pub fn fail_shell(&self, reason: &str) {
        let _ = self
            .shell_tx
            .send(ShellEvent::Error(SshError::channel(ChannelKind::Shell, reason)));
    }

    pub fn close_shell(&self) {
        let _ = self.shell_tx.send(ShellEvent::Close);
    }

    /// Fail the transport, as a network drop or keepalive timeout would.
    pub fn drop_connection(&self, reason: &str) {
        *self.lost.lock().unwrap() = Some(SshError::ConnectionLost(reason.to_string()));
        self.gone.cancel();
    }

    /// Make every later shell write fail.
    pub fn break_writes(&self, reason: &str) {
        *self.write_failure.lock().unwrap() = Some(reason.to_string());
    }

    fn lost(&self) -> Option<SshError> {
        self.lost.lock().unwrap().clone()
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
    }

    pub fn is_disconnected(&self) -> bool {
        self.gone.is_cancelled()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn keepalive_count(&self) -> usize {
        self.writes().iter().filter(|w| w.as_slice() == [0u8]).count()
    }
}

#[derive(Clone)]
pub struct MockConnector {
    behavior: Arc<Mutex<ConnectBehavior>>,
    remotes: Arc<Mutex<Vec<Arc<MockRemote>>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::with_behavior(ConnectBehavior::Accept)
    }

    pub fn with_behavior(behavior: ConnectBehavior) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(behavior)),
            remotes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Every connection attempt that got past the handshake, in order.
    pub fn remotes(&self) -> Vec<Arc<MockRemote>> {
        self.remotes.lock().unwrap().clone()
    }

    pub fn last_remote(&self) -> Arc<MockRemote> {
        self.remotes().pop().expect("no connection was made")
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, credentials: &Credentials) -> Result<MockConnection, SshError> {
        let behavior = self.behavior.lock().unwrap().clone();
        let refuse_shell = match behavior {
            ConnectBehavior::Accept => false,
            ConnectBehavior::Reject(err) => return Err(err),
            ConnectBehavior::Hang => std::future::pending().await,
            ConnectBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                false
            }
            ConnectBehavior::RefuseShell => true,
        };

        let remote = Arc::new(MockRemote::new(credentials.clone()));
        self.remotes.lock().unwrap().push(remote.clone());
        Ok(MockConnection {
            remote,
            refuse_shell,
        })
    }
}

pub struct MockConnection {
    remote: Arc<MockRemote>,
    refuse_shell: bool,
}

impl RemoteConnection for MockConnection {
    type Shell = MockShell;

    async fn open_shell(&self, pty: &PtyRequest) -> Result<MockShell, SshError> {
        if self.refuse_shell {
            return Err(SshError::channel_open(
                ChannelKind::Shell,
                "administratively prohibited",
            ));
        }
        *self.remote.pty.lock().unwrap() = Some(pty.clone());
        let output = self
            .remote
            .shell_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SshError::channel_open(ChannelKind::Shell, "shell already open"))?;
        Ok(MockShell {
            remote: self.remote.clone(),
            output,
            closed: false,
        })
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        if self.remote.is_disconnected() {
            return Err(self.remote.lost().unwrap_or(SshError::Disconnected));
        }
        let output = match command {
            "echo hi" => CommandOutput {
                stdout: b"hi\n".to_vec(),
                exit_code: Some(0),
                ..Default::default()
            },
            "exit 3" => CommandOutput {
                exit_code: Some(3),
                ..Default::default()
            },
            "ls /missing" => CommandOutput {
                stderr: b"ls: cannot access '/missing': No such file or directory\n".to_vec(),
                exit_code: Some(2),
                ..Default::default()
            },
            "kill -TERM $$" => CommandOutput {
                signal: Some("TERM".to_string()),
                ..Default::default()
            },
            BLOCKING_COMMAND => {
                self.remote.gone.cancelled().await;
                return Err(self.remote.lost().unwrap_or(SshError::Disconnected));
            }
            other => CommandOutput {
                stderr: format!("sh: {}: command not found\n", other).into_bytes(),
                exit_code: Some(127),
                ..Default::default()
            },
        };
        Ok(output)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SshError> {
        if self.remote.is_disconnected() {
            return Err(self.remote.lost().unwrap_or(SshError::Disconnected));
        }
        self.remote
            .files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| SshError::channel(ChannelKind::Fetch, "No such file"))
    }

    async fn disconnect(&self) {
        self.remote.gone.cancel();
    }
}

pub struct MockShell {
    remote: Arc<MockRemote>,
    output: mpsc::UnboundedReceiver<ShellEvent>,
    closed: bool,
}

impl ShellChannel for MockShell {
    async fn write(&mut self, data: &[u8]) -> Result<(), SshError> {
        if self.closed || self.remote.is_disconnected() {
            return Err(SshError::channel(ChannelKind::Shell, "channel closed"));
        }
        if let Some(reason) = self.remote.write_failure.lock().unwrap().clone() {
            return Err(SshError::channel(ChannelKind::Shell, reason));
        }
        self.remote.writes.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn resize(&mut self, size: WindowSize) -> Result<(), SshError> {
        self.remote.resizes.lock().unwrap().push(size);
        Ok(())
    }

    async fn next_chunk(&mut self) -> Option<Result<Bytes, SshError>> {
        if self.closed {
            return None;
        }
        let event = tokio::select! {
            event = self.output.recv() => event,
            _ = self.remote.gone.cancelled() => None,
        };
        match event {
            Some(ShellEvent::Data(bytes)) => Some(Ok(bytes)),
            Some(ShellEvent::Error(err)) => Some(Err(err)),
            Some(ShellEvent::Close) => {
                self.closed = true;
                None
            }
            None => {
                self.closed = true;
                self.remote.lost().map(Err)
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
