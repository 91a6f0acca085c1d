//! # ShellBridge Protocol Library
//!
//! Wire protocol between a browser terminal and the ShellBridge gateway.
//!
//! ## Overview
//!
//! - **Message Definitions**: the client and server message catalogue
//! - **Frame Codec**: mapping of messages onto WebSocket text and binary frames
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   ClientMessage / ServerMessage         │  JSON, kebab-case "type" tag
//! ├─────────────────────────────────────────┤
//! │              Frame codec                │  text = JSON, binary = shell bytes
//! ├─────────────────────────────────────────┤
//! │              WebSocket                  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{codec, ClientMessage, Frame};
//!
//! let frame = Frame::Text(r#"{"type":"execute","command":"uptime"}"#.to_string());
//! let message = codec::decode_client(frame).unwrap();
//! assert!(matches!(message, ClientMessage::Execute(_)));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Protocol message definitions
//! - [`codec`]: Frame codec
//! - [`error`]: Error types

pub mod codec;
pub mod error;
pub mod messages;

pub use codec::{Frame, MAX_TEXT_FRAME_SIZE};
pub use error::{ProtocolError, Result};
pub use messages::{
    ClientMessage, CommandResult, ConnectRequest, ErrorMessage, Execute, Fetch, FetchError,
    FetchResult, Input, Resize, ServerMessage,
};
