//! Protocol error types

use thiserror::Error;

/// Errors raised while validating protocol values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Connection settings are incomplete or inconsistent
    #[error("Invalid connection settings: {0}")]
    InvalidSettings(String),
}
