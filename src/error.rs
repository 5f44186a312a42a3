//! Error handling module
//!
//! Defines the error types for the Dockyard server.

use std::io;

use thiserror::Error;

/// Main error type for the Dockyard server
#[derive(Error, Debug)]
pub enum ServerError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Framing errors on the inbound byte stream
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A packet handler reported a failure
    #[error("Handler error: {0}")]
    Handler(String),

    /// Protobuf encoding failed
    #[error("Encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    /// Protobuf decoding failed
    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ServerError {
    /// Whether this error is an ordinary peer disconnect rather than a fault
    pub fn is_disconnect(&self) -> bool {
        match self {
            ServerError::Network(NetworkError::ConnectionClosed) => true,
            ServerError::Network(NetworkError::WriteError(e)) => is_disconnect_kind(e.kind()),
            ServerError::Io(e) => is_disconnect_kind(e.kind()),
            _ => false,
        }
    }
}

fn is_disconnect_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Session already closed")]
    SessionClosed,

    #[error("Too many connections from {0}")]
    TooManyConnections(String),

    #[error("Client {0} is not in a private address range")]
    NotPrivate(String),

    #[error("Server is not accepting connections")]
    NotAccepting,

    #[error("Server is in maintenance")]
    Maintenance,

    #[error("Write error: {0}")]
    WriteError(#[source] io::Error),
}

/// Framing errors raised while splitting a read into frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Truncated header at offset {offset}: {available} bytes available")]
    TruncatedHeader { offset: usize, available: usize },

    #[error("Truncated frame at offset {offset}: need {needed} bytes, {available} available")]
    TruncatedFrame {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Invalid frame size {size} (minimum {min})")]
    InvalidFrameSize { size: usize, min: usize },

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Read length {n} exceeds buffer length {len}")]
    ReadOutOfBounds { n: usize, len: usize },
}

/// Result type alias for Dockyard operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Reason codes carried by the disconnect notice (opcode 10999)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    /// Logged in from another device
    LoggedInElsewhere = 1,
    /// Server shutting down or connection dropped by the server
    ConnectionLost = 2,
    /// Server entering maintenance
    Maintenance = 3,
    /// Client sent a malformed packet
    InvalidPacket = 4,
}

impl DisconnectReason {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable description used in logs
    pub fn describe(self) -> &'static str {
        match self {
            DisconnectReason::LoggedInElsewhere => "logged in from another device",
            DisconnectReason::ConnectionLost => "connection to server lost",
            DisconnectReason::Maintenance => "server maintenance",
            DisconnectReason::InvalidPacket => "invalid packet",
        }
    }
}
