//! Tunnel error types

use thiserror::Error;

/// Errors raised while establishing or running a tunnel
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Private key file missing or unreadable
    #[error("Private key not found at {path}: {message}")]
    KeyNotFound { path: String, message: String },

    /// The SSH server rejected our credentials
    #[error("Authentication rejected by SSH server")]
    AuthRejected,

    /// Host key verification failed
    #[error("Host key verification failed: {message}")]
    HostKeyRejected { message: String },

    /// SSH server did not answer in time
    #[error("Connection to {0} timed out")]
    Timeout(String),

    /// Listen requested before a tunnel was established
    #[error("Tunnel not established")]
    NotEstablished,

    /// Worker was cancelled
    #[error("Tunnel cancelled")]
    Cancelled,

    /// SSH protocol error
    #[error("SSH error: {0}")]
    Ssh(String),

    /// I/O error on the local listener
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
