//! # ShellBridge Gateway Library
//!
//! Bridges browser terminals to remote hosts over SSH.
//!
//! ## Overview
//!
//! Each browser opens a WebSocket and sends a `connect` message carrying SSH
//! credentials. The gateway dials the host, opens an interactive shell with a
//! pseudo-terminal, and relays bytes both ways until either side goes away.
//! One-shot command execution and file fetches run on their own channels of
//! the same connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   WebSocket   ┌────────────────────────────────────────┐
//! │   Browser    │◄─────────────►│              server (axum)             │
//! └──────────────┘               ├────────────────────────────────────────┤
//!                                │  relay: one ClientRelay per socket     │
//!                                ├────────────────────────────────────────┤
//!                                │  session::SessionRegistry              │
//!                                │    client id ─► RemoteSession (actor)  │
//!                                │                  ├─ KeepaliveDriver    │
//!                                │                  └─ one-shot channels  │
//!                                ├────────────────────────────────────────┤
//!                                │  ssh: Connector / RemoteConnection     │
//!                                └───────────────────┬────────────────────┘
//!                                                    │ SSH
//!                                              ┌─────▼─────┐
//!                                              │  remote   │
//!                                              └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gateway::{AppState, Config, GatewayServer, RusshConnector, SessionOptions, SessionRegistry};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let registry = SessionRegistry::new(
//!         RusshConnector::new(&config.ssh),
//!         SessionOptions::from_config(&config.ssh),
//!     );
//!     let state = AppState {
//!         registry: Arc::new(registry),
//!         default_port: config.ssh.default_port,
//!         shutdown: CancellationToken::new(),
//!     };
//!     GatewayServer::bind(config.listen_addr()?, state).await?.run().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`logging`]: Tracing subscriber setup
//! - [`server`]: HTTP routes and WebSocket handling
//! - [`relay`]: Per-client message dispatch
//! - [`session`]: Remote session lifecycle and registry
//! - [`ssh`]: SSH connection layer

pub mod config;
pub mod logging;
pub mod relay;
pub mod server;
pub mod session;
pub mod ssh;

pub use config::{Config, ConfigError};
pub use relay::ClientRelay;
pub use server::{router, AppState, GatewayServer, HealthResponse};
pub use session::{
    RemoteSession, SessionError, SessionEvent, SessionOptions, SessionRegistry, SessionState,
};
pub use ssh::{Connector, Credentials, RemoteConnection, RusshConnector, ShellChannel, SshError};

pub use protocol;
