use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Lock acquisition timed out after {0:?}")]
    LockTimeout(Duration),
    #[error("Attempted to release a lock that is not held")]
    LockNotHeld,
    #[error("Payload too large: {size} > {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Handshake rejected: {0}")]
    ProtocolMismatch(String),
    #[error("Buffer name mismatch: expected '{expected}', host serves '{actual}'")]
    NameMismatch { expected: String, actual: String },
    #[error("Server error: {0}")]
    ServerError(String),
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("Timed out waiting for handshake")]
    HandshakeTimeout,
    #[error("Timed out waiting for READ response")]
    ReadTimeout,
    #[error("Timed out waiting for WRITE response")]
    WriteTimeout,
    #[error("Connection closed by peer")]
    ConnectionClosed,
    #[error("Not connected")]
    NotConnected,

    #[error("Invalid buffer name: {0}")]
    InvalidName(String),
    #[error("Initialization Failed: {0}")]
    Bootstrap(String),
    #[error("Configuration Error: {0}")]
    Config(String),
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Failures after which the relay socket can no longer be trusted.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            RelayError::ReadTimeout
                | RelayError::WriteTimeout
                | RelayError::ConnectionClosed
                | RelayError::ProtocolViolation(_)
                | RelayError::Io(_)
        )
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
