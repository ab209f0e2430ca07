//! Coordination Protocol
//!
//! Wire protocol between election nodes and the coordination server.
//! Each message is a bincode body behind an 8-byte header carrying the body
//! length and its crc32.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Largest body accepted from the wire
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

/// Protocol messages between client and server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    // ========== Session ==========
    /// Open a session (first message on a connection)
    OpenSession {
        timeout_ms: u64,
    },

    /// Session granted
    SessionOpened {
        session_id: u64,
        timeout_ms: u64,
    },

    /// Keep-alive
    Ping,

    /// Keep-alive response
    Pong,

    /// End the session and delete its ephemeral nodes
    CloseSession,

    /// Session ended
    SessionClosed,

    // ========== Nodes ==========
    /// Existence check
    Exists {
        path: String,
    },

    /// Existence check response
    ExistsResponse {
        exists: bool,
    },

    /// Create an ephemeral node owned by the session
    CreateEphemeral {
        path: String,
        data: Vec<u8>,
    },

    /// Node created
    Created {
        path: String,
    },

    // ========== Error ==========
    /// Error response
    Error {
        code: ErrorCode,
        message: String,
    },
}

/// Error codes for protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// A node already exists at the path
    NodeExists,
    /// The session is gone
    SessionExpired,
    /// A session request arrived before `OpenSession`
    NoSession,
    /// Malformed request
    InvalidRequest,
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> std::result::Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> std::result::Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Build the error response for a failed namespace operation
    pub fn from_error(err: &Error) -> Self {
        let code = match err {
            Error::NodeExists(_) => ErrorCode::NodeExists,
            Error::SessionExpired => ErrorCode::SessionExpired,
            _ => ErrorCode::InvalidRequest,
        };
        Message::Error {
            code,
            message: err.to_string(),
        }
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::OpenSession { .. } => "OpenSession",
            Message::SessionOpened { .. } => "SessionOpened",
            Message::Ping => "Ping",
            Message::Pong => "Pong",
            Message::CloseSession => "CloseSession",
            Message::SessionClosed => "SessionClosed",
            Message::Exists { .. } => "Exists",
            Message::ExistsResponse { .. } => "ExistsResponse",
            Message::CreateEphemeral { .. } => "CreateEphemeral",
            Message::Created { .. } => "Created",
            Message::Error { .. } => "Error",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            checksum: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

/// Read a framed message from a reader
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > MAX_FRAME_LEN {
        return Err(Error::Network(format!("Frame of {} bytes exceeds limit", header.length)));
    }

    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    if crc32fast::hash(&body) != header.checksum {
        return Err(Error::Network("Message checksum mismatch".into()));
    }

    Ok(Message::deserialize(&body)?)
}

/// Write a framed message to a writer
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let body = message.serialize()?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}
