//! Error taxonomy for the haptic control subsystem.
//!
//! None of these are fatal to the host; the worst outcome is a dropped command.

use thiserror::Error;

/// Failure reported by a transport adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("endpoint rejected the request: {0}")]
    Rejected(String),

    #[error("unknown device index {0}")]
    UnknownDevice(u32),

    #[error("endpoint did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("session is closed")]
    SessionClosed,

    #[error("i/o error: {0}")]
    Io(String),

    #[error("malformed message: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Protocol(e.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("client already connected")]
    AlreadyConnected,

    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("client is not connected")]
    NotConnected,

    #[error("handshake failed: {0}")]
    HandshakeFailed(#[source] TransportError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("client is not connected")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
