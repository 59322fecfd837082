//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] nkips_protocol::ProtocolError),

    #[error("{0}")]
    Core(#[from] nkips_core::CoreError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("session shut down")]
    ShutDown,

    #[error("cannot resolve {host}: {reason}")]
    Resolve { host: String, reason: String },
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Timeout
                | ClientError::ConnectionClosed
                | ClientError::NotConnected
                | ClientError::Resolve { .. }
        )
    }
}
