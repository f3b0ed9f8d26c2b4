//! Error types shared by all wireline crates.

use std::io;
use thiserror::Error;

/// Main error type for wireline operations
#[derive(Error, Debug)]
pub enum WirelineError {
    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Wire-level protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Protocol signatures did not match
    #[error("Incompatible protocol signatures")]
    SignatureMismatch,

    /// A frame or datagram could not be decoded into a message
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Endpoint string could not be parsed
    #[error("Invalid endpoint: {0}")]
    Endpoint(String),

    /// Compression or decompression failure
    #[error("Compression error: {0}")]
    Compression(String),

    /// The owner side of a channel has gone away
    #[error("Channel closed")]
    ChannelClosed,

    /// A bounded wait expired
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type alias for wireline operations
pub type Result<T> = std::result::Result<T, WirelineError>;

impl WirelineError {
    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a malformed-message error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    /// Check if this error is fatal for the owning connection
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io(e) => !matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::SignatureMismatch | Self::ChannelClosed => true,
            // A single bad frame or datagram never tears the connection down
            Self::MalformedMessage(_) | Self::Compression(_) => false,
            _ => false,
        }
    }
}
