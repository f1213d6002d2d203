//! Core domain types

use hb_protocol::ServerHandleId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which secret a credential prompt asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// SSH password
    SshPassword,
    /// Passphrase of the SSH private key
    SshKeyPassphrase,
    /// Passphrase of the TLS PEM key file
    PemPassphrase,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::SshPassword => write!(f, "password"),
            CredentialKind::SshKeyPassphrase => write!(f, "passphrase"),
            CredentialKind::PemPassphrase => write!(f, "PEM passphrase"),
        }
    }
}

/// A request for a secret the user has to type in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRequest {
    /// Which secret
    pub kind: CredentialKind,
    /// Dialog title
    pub title: String,
    /// Explanatory text
    pub text: String,
}

/// Snapshot of the orchestrator's collections
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    /// Number of owned server handles
    pub server_count: usize,
    /// Number of owned shells
    pub shell_count: usize,
    /// Number of tunnel negotiations in flight or listening
    pub pending_tunnels: usize,
    /// Last allocated server handle, if any
    pub last_handle: Option<ServerHandleId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_kind_display() {
        assert_eq!(format!("{}", CredentialKind::SshPassword), "password");
        assert_eq!(format!("{}", CredentialKind::SshKeyPassphrase), "passphrase");
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = OrchestratorStatus {
            server_count: 2,
            shell_count: 1,
            pending_tunnels: 0,
            last_handle: Some(ServerHandleId::new(4)),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains(r#""serverCount":2"#));
        assert!(json.contains(r#""lastHandle":4"#));
    }
}
