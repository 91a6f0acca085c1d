//! Mapping between protocol messages and WebSocket frames.
//!
//! The codec knows nothing about a particular WebSocket library: callers
//! convert [`Frame`] to and from their transport's message type.
//!
//! | direction | message | frame |
//! |-----------|---------|-------|
//! | server → client | `ServerMessage::Data` | binary, raw bytes |
//! | server → client | everything else | text, JSON |
//! | client → server | binary | `ClientMessage::InputBytes` |
//! | client → server | text | JSON `ClientMessage` |

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::messages::{ClientMessage, ServerMessage};

/// Largest accepted text frame (1 MiB). Binary frames are bounded by the transport.
pub const MAX_TEXT_FRAME_SIZE: usize = 1024 * 1024;

/// A transport-agnostic WebSocket data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode a message for the browser.
pub fn encode_server(message: &ServerMessage) -> Result<Frame> {
    match message {
        ServerMessage::Data(bytes) => Ok(Frame::Binary(bytes.clone())),
        other => Ok(Frame::Text(serde_json::to_string(other)?)),
    }
}

/// Decode a frame received from the browser.
pub fn decode_client(frame: Frame) -> Result<ClientMessage> {
    match frame {
        Frame::Binary(bytes) => Ok(ClientMessage::InputBytes(bytes)),
        Frame::Text(text) => {
            check_text_size(&text)?;
            Ok(serde_json::from_str(&text)?)
        }
    }
}

/// Encode a browser message. Used by clients and tests.
pub fn encode_client(message: &ClientMessage) -> Result<Frame> {
    match message {
        ClientMessage::InputBytes(bytes) => Ok(Frame::Binary(bytes.clone())),
        other => Ok(Frame::Text(serde_json::to_string(other)?)),
    }
}

/// Decode a frame sent by the gateway. Used by clients and tests.
pub fn decode_server(frame: Frame) -> Result<ServerMessage> {
    match frame {
        Frame::Binary(bytes) => Ok(ServerMessage::Data(bytes)),
        Frame::Text(text) => {
            check_text_size(&text)?;
            Ok(serde_json::from_str(&text)?)
        }
    }
}

fn check_text_size(text: &str) -> Result<()> {
    if text.len() > MAX_TEXT_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: text.len(),
            max: MAX_TEXT_FRAME_SIZE,
        });
    }
    Ok(())
}
