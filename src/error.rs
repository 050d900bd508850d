//! Errors that end a session. Everything recoverable is a reply instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line too long (max {max} bytes)")]
    LineTooLong { max: usize },

    #[error("timed out waiting for the client")]
    Timeout,

    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),
}
