//! Core error types for Harbor

use hb_protocol::{ProtocolError, ServerHandleId, ShellId};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for Harbor
#[derive(Error, Debug)]
pub enum HbError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Shell error
    #[error("Shell error: {0}")]
    Shell(#[from] ShellError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The orchestrator service is no longer running
    #[error("Orchestrator service stopped")]
    ServiceStopped,
}

/// Connection-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// No server with this handle is owned by the orchestrator
    #[error("Server not found: {0}")]
    ServerNotFound(ServerHandleId),

    /// No tunnel is being negotiated or forwarding for this handle
    #[error("No pending tunnel for {0}")]
    NotPending(ServerHandleId),
}

/// Shell-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    /// Shell not owned by the orchestrator
    #[error("Shell not found: {0}")]
    NotFound(ShellId),

    /// Script execution is not available on this transport
    #[error("Script execution unsupported: {0}")]
    Unsupported(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Unknown connection profile
    #[error("Unknown connection profile: {0}")]
    UnknownProfile(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
