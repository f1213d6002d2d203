//! Handle identifier types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for one server connection attempt.
///
/// Allocated by the orchestrator from a monotonic counter shared by every
/// connection type. Ids are never reused, even for attempts that fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerHandleId(pub u64);

impl ServerHandleId {
    /// Create a new server handle ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The id following this one
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ServerHandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server-{}", self.0)
    }
}

impl From<u64> for ServerHandleId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Unique identifier for a shell session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShellId(pub u64);

impl ShellId {
    /// Create a new shell ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The id following this one
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ShellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shell-{}", self.0)
    }
}

impl From<u64> for ShellId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        assert_eq!(format!("{}", ServerHandleId::new(42)), "server-42");
        assert_eq!(format!("{}", ShellId::new(7)), "shell-7");
    }

    #[test]
    fn test_handle_ordering() {
        let first = ServerHandleId::new(1);
        let second = first.next();

        assert!(first < second);
        assert_eq!(second.as_u64(), 2);
        assert_ne!(first, second);
    }
}
