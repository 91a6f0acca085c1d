//! End-to-end tests for the gateway over a real WebSocket.
//!
//! These tests run the axum server on an ephemeral port against an in-memory
//! SSH layer and drive it with a tokio-tungstenite client:
//! - Session lifecycle (connect, ready, disconnect, closed)
//! - Shell relay in both directions
//! - One-shot execute and fetch
//! - Health endpoint and registry cleanup

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use gateway::protocol::{
    codec, ClientMessage, ConnectRequest, Execute, Fetch, Frame, Input, ServerMessage,
};
use gateway::ssh::{CommandOutput, PtyRequest, WindowSize};
use gateway::{
    AppState, Connector, Credentials, GatewayServer, HealthResponse, RemoteConnection,
    SessionOptions, SessionRegistry, ShellChannel, SshError,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

const STEP: Duration = Duration::from_secs(5);

// =============================================================================
// In-memory SSH layer
// =============================================================================

/// Accepts password `secret`; the shell echoes its input back.
#[derive(Clone, Default)]
struct EchoConnector {
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl Connector for EchoConnector {
    type Connection = EchoConnection;

    async fn connect(&self, credentials: &Credentials) -> Result<EchoConnection, SshError> {
        match credentials.auth() {
            gateway::ssh::AuthMethod::Password(pw) if pw == "secret" => {}
            _ => return Err(SshError::AuthRejected),
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        let mut files = HashMap::new();
        files.insert("/etc/motd".to_string(), b"Welcome to web-1\n".to_vec());
        Ok(EchoConnection {
            files,
            gone: CancellationToken::new(),
            disconnects: self.disconnects.clone(),
        })
    }
}

struct EchoConnection {
    files: HashMap<String, Vec<u8>>,
    gone: CancellationToken,
    disconnects: Arc<AtomicUsize>,
}

impl RemoteConnection for EchoConnection {
    type Shell = EchoShell;

    async fn open_shell(&self, pty: &PtyRequest) -> Result<EchoShell, SshError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let banner = format!("{} {}x{}\r\n$ ", pty.term, pty.size.cols, pty.size.rows);
        let _ = tx.send(Bytes::from(banner));
        Ok(EchoShell {
            tx,
            rx,
            exited: CancellationToken::new(),
            gone: self.gone.clone(),
        })
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        let output = match command {
            "hostname" => CommandOutput {
                stdout: b"web-1\n".to_vec(),
                exit_code: Some(0),
                ..Default::default()
            },
            other => CommandOutput {
                stderr: format!("sh: {}: not found\n", other).into_bytes(),
                exit_code: Some(127),
                ..Default::default()
            },
        };
        Ok(output)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SshError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| SshError::Channel {
                kind: gateway::ssh::ChannelKind::Fetch,
                reason: "No such file".into(),
            })
    }

    async fn disconnect(&self) {
        if !self.gone.is_cancelled() {
            self.gone.cancel();
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct EchoShell {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    exited: CancellationToken,
    gone: CancellationToken,
}

impl ShellChannel for EchoShell {
    async fn write(&mut self, data: &[u8]) -> Result<(), SshError> {
        if data == b"exit\r" {
            self.exited.cancel();
            return Ok(());
        }
        let _ = self.tx.send(Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn resize(&mut self, size: WindowSize) -> Result<(), SshError> {
        let _ = self
            .tx
            .send(Bytes::from(format!("[resized {}x{}]", size.cols, size.rows)));
        Ok(())
    }

    async fn next_chunk(&mut self) -> Option<Result<Bytes, SshError>> {
        tokio::select! {
            chunk = self.rx.recv() => chunk.map(Ok),
            _ = self.exited.cancelled() => None,
            _ = self.gone.cancelled() => None,
        }
    }

    async fn close(&mut self) {
        self.exited.cancel();
    }
}

// =============================================================================
// Harness
// =============================================================================

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestGateway {
    addr: SocketAddr,
    connector: EchoConnector,
    shutdown: CancellationToken,
    server: JoinHandle<anyhow::Result<()>>,
}

impl TestGateway {
    async fn start() -> Self {
        let connector = EchoConnector::default();
        let shutdown = CancellationToken::new();
        let state = AppState {
            registry: Arc::new(SessionRegistry::new(
                connector.clone(),
                SessionOptions::default(),
            )),
            default_port: 22,
            shutdown: shutdown.clone(),
        };
        let server = GatewayServer::bind("127.0.0.1:0".parse().unwrap(), state)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let server = tokio::spawn(server.run());

        Self {
            addr,
            connector,
            shutdown,
            server,
        }
    }

    async fn socket(&self) -> Socket {
        let url = format!("ws://{}/ws", self.addr);
        let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        socket
    }

    async fn health(&self) -> HealthResponse {
        reqwest::get(format!("http://{}/health", self.addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Poll `/health` until the session count drops to `expected`.
    async fn wait_for_sessions(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + STEP;
        loop {
            if self.health().await.active_sessions == expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "session count never reached {}",
                expected
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Poll `condition` until it holds.
async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + STEP;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn send(socket: &mut Socket, message: ClientMessage) {
    let ws_message = match codec::encode_client(&message).unwrap() {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.to_vec().into()),
    };
    socket.send(ws_message).await.unwrap();
}

async fn recv(socket: &mut Socket) -> ServerMessage {
    loop {
        let message = tokio::time::timeout(STEP, socket.next())
            .await
            .expect("timed out waiting for a server message")
            .expect("socket closed")
            .unwrap();
        let frame = match message {
            Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            Message::Binary(data) => Frame::Binary(Bytes::from(data)),
            _ => continue,
        };
        return codec::decode_server(frame).unwrap();
    }
}

/// Skip shell output until a non-data message arrives.
async fn recv_control(socket: &mut Socket) -> ServerMessage {
    loop {
        match recv(socket).await {
            ServerMessage::Data(_) => continue,
            other => return other,
        }
    }
}

/// Collect shell output until it contains `needle`.
async fn recv_output_containing(socket: &mut Socket, needle: &str) -> String {
    let mut seen = String::new();
    while !seen.contains(needle) {
        match recv(socket).await {
            ServerMessage::Data(bytes) => seen.push_str(&String::from_utf8_lossy(&bytes)),
            other => panic!("expected shell output, got {:?}", other),
        }
    }
    seen
}

fn connect_request(password: &str) -> ClientMessage {
    ClientMessage::Connect(ConnectRequest {
        host: "web-1".into(),
        port: None,
        username: "ops".into(),
        password: Some(password.into()),
        private_key: None,
        passphrase: None,
    })
}

async fn connected_socket(gateway: &TestGateway) -> Socket {
    let mut socket = gateway.socket().await;
    send(&mut socket, connect_request("secret")).await;
    assert_eq!(recv(&mut socket).await, ServerMessage::Ready);
    socket
}

// =============================================================================
// Session Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_connect_reaches_ready_with_banner() {
    let gateway = TestGateway::start().await;
    let mut socket = connected_socket(&gateway).await;

    let banner = recv_output_containing(&mut socket, "$ ").await;
    assert!(banner.starts_with("xterm-256color 80x24"));
    assert_eq!(gateway.health().await.active_sessions, 1);
}

#[tokio::test]
async fn test_wrong_password_reports_error_then_closed() {
    let gateway = TestGateway::start().await;
    let mut socket = gateway.socket().await;

    send(&mut socket, connect_request("hunter2")).await;
    assert_eq!(
        recv(&mut socket).await,
        ServerMessage::error("authentication failed")
    );
    assert_eq!(recv(&mut socket).await, ServerMessage::Closed);
    gateway.wait_for_sessions(0).await;
    assert_eq!(gateway.connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_disconnect_message_closes_session() {
    let gateway = TestGateway::start().await;
    let mut socket = connected_socket(&gateway).await;

    send(&mut socket, ClientMessage::Disconnect).await;
    assert_eq!(recv_control(&mut socket).await, ServerMessage::Closed);
    gateway.wait_for_sessions(0).await;
    assert_eq!(gateway.connector.disconnects.load(Ordering::SeqCst), 1);

    // The socket stays usable for a fresh session.
    send(&mut socket, connect_request("secret")).await;
    assert_eq!(recv_control(&mut socket).await, ServerMessage::Ready);
}

#[tokio::test]
async fn test_remote_exit_closes_session() {
    let gateway = TestGateway::start().await;
    let mut socket = connected_socket(&gateway).await;

    send(&mut socket, ClientMessage::Input(Input { data: "exit\r".into() })).await;
    assert_eq!(recv_control(&mut socket).await, ServerMessage::Closed);
    gateway.wait_for_sessions(0).await;
}

#[tokio::test]
async fn test_socket_close_releases_session() {
    let gateway = TestGateway::start().await;
    let mut socket = connected_socket(&gateway).await;

    socket.close(None).await.unwrap();
    drop(socket);

    gateway.wait_for_sessions(0).await;
    let disconnects = gateway.connector.disconnects.clone();
    wait_until("the ssh connection to close", || {
        disconnects.load(Ordering::SeqCst) == 1
    })
    .await;
}

#[tokio::test]
async fn test_reconnect_replaces_session() {
    let gateway = TestGateway::start().await;
    let mut socket = connected_socket(&gateway).await;

    send(&mut socket, connect_request("secret")).await;
    assert_eq!(recv_control(&mut socket).await, ServerMessage::Ready);

    assert_eq!(gateway.connector.connects.load(Ordering::SeqCst), 2);
    let disconnects = gateway.connector.disconnects.clone();
    wait_until("the replaced connection to close", || {
        disconnects.load(Ordering::SeqCst) == 1
    })
    .await;
    assert_eq!(gateway.health().await.active_sessions, 1);
}

#[tokio::test]
async fn test_shutdown_disconnects_sessions() {
    let gateway = TestGateway::start().await;
    let _first = connected_socket(&gateway).await;
    let _second = connected_socket(&gateway).await;

    gateway.shutdown.cancel();
    let result = tokio::time::timeout(STEP, gateway.server)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(gateway.connector.disconnects.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Shell Relay Tests
// =============================================================================

#[tokio::test]
async fn test_text_input_is_echoed() {
    let gateway = TestGateway::start().await;
    let mut socket = connected_socket(&gateway).await;
    recv_output_containing(&mut socket, "$ ").await;

    send(&mut socket, ClientMessage::Input(Input { data: "uptime\r".into() })).await;
    recv_output_containing(&mut socket, "uptime\r").await;
}

#[tokio::test]
async fn test_binary_input_is_echoed() {
    let gateway = TestGateway::start().await;
    let mut socket = connected_socket(&gateway).await;
    recv_output_containing(&mut socket, "$ ").await;

    socket
        .send(Message::Binary(b"\x1b[A".to_vec().into()))
        .await
        .unwrap();
    recv_output_containing(&mut socket, "\u{1b}[A").await;
}

#[tokio::test]
async fn test_resize_reaches_shell() {
    let gateway = TestGateway::start().await;
    let mut socket = connected_socket(&gateway).await;
    recv_output_containing(&mut socket, "$ ").await;

    send(
        &mut socket,
        ClientMessage::Resize(gateway::protocol::Resize {
            cols: 132,
            rows: 43,
        }),
    )
    .await;
    recv_output_containing(&mut socket, "[resized 132x43]").await;
}

#[tokio::test]
async fn test_input_before_connect_is_ignored() {
    let gateway = TestGateway::start().await;
    let mut socket = gateway.socket().await;

    send(&mut socket, ClientMessage::Input(Input { data: "ls\r".into() })).await;
    send(&mut socket, ClientMessage::Ping).await;
    assert_eq!(recv(&mut socket).await, ServerMessage::Pong);
}

// =============================================================================
// One-shot Tests
// =============================================================================

#[tokio::test]
async fn test_execute_returns_command_result() {
    let gateway = TestGateway::start().await;
    let mut socket = connected_socket(&gateway).await;

    send(
        &mut socket,
        ClientMessage::Execute(Execute {
            command: "hostname".into(),
        }),
    )
    .await;
    match recv_control(&mut socket).await {
        ServerMessage::CommandResult(result) => {
            assert_eq!(result.output, "web-1\n");
            assert_eq!(result.error_output, "");
            assert_eq!(result.exit_code, Some(0));
            assert_eq!(result.signal, None);
        }
        other => panic!("expected command-result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_execute_without_session() {
    let gateway = TestGateway::start().await;
    let mut socket = gateway.socket().await;

    send(
        &mut socket,
        ClientMessage::Execute(Execute {
            command: "hostname".into(),
        }),
    )
    .await;
    match recv(&mut socket).await {
        ServerMessage::CommandResult(result) => {
            assert_eq!(result.error_output, "not connected");
            assert_eq!(result.exit_code, Some(1));
        }
        other => panic!("expected command-result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fetch_returns_base64_content() {
    let gateway = TestGateway::start().await;
    let mut socket = connected_socket(&gateway).await;

    send(
        &mut socket,
        ClientMessage::Fetch(Fetch {
            path: "/etc/motd".into(),
        }),
    )
    .await;
    match recv_control(&mut socket).await {
        ServerMessage::FetchResult(result) => {
            assert_eq!(result.path, "/etc/motd");
            assert_eq!(result.decode_content().unwrap(), b"Welcome to web-1\n");
        }
        other => panic!("expected fetch-result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fetch_missing_file_keeps_session() {
    let gateway = TestGateway::start().await;
    let mut socket = connected_socket(&gateway).await;

    send(
        &mut socket,
        ClientMessage::Fetch(Fetch {
            path: "/nope".into(),
        }),
    )
    .await;
    match recv_control(&mut socket).await {
        ServerMessage::FetchError(error) => {
            assert_eq!(error.path, "/nope");
            assert!(error.message.contains("No such file"));
        }
        other => panic!("expected fetch-error, got {:?}", other),
    }

    send(&mut socket, ClientMessage::Input(Input { data: "still here\r".into() })).await;
    recv_output_containing(&mut socket, "still here").await;
}

// =============================================================================
// Transport Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let gateway = TestGateway::start().await;
    let health = gateway.health().await;
    assert_eq!(health.status, "OK");
    assert_eq!(health.active_sessions, 0);
    assert!(!health.timestamp.is_empty());
}

#[tokio::test]
async fn test_malformed_message_reports_error() {
    let gateway = TestGateway::start().await;
    let mut socket = gateway.socket().await;

    socket
        .send(Message::Text(r#"{"type":"teleport"}"#.to_string().into()))
        .await
        .unwrap();
    match recv(&mut socket).await {
        ServerMessage::Error(error) => assert!(error.message.starts_with("invalid message")),
        other => panic!("expected error, got {:?}", other),
    }

    send(&mut socket, ClientMessage::Ping).await;
    assert_eq!(recv(&mut socket).await, ServerMessage::Pong);
}
