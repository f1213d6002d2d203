//! Connection settings
//!
//! Describes how to reach one database server, including the optional SSH
//! tunnel and TLS configuration. Settings are deep-copied (`Clone`) whenever
//! they are handed to a background worker, so a worker never observes later
//! edits of the caller's copy and the caller never observes the worker's.
//!
//! Secrets typed in at a prompt (`asked_password`, `pem_pass_phrase`) are
//! skipped by serde and therefore never written to a configuration file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ProtocolError;

/// Default database server port
pub const DEFAULT_SERVER_PORT: u16 = 27017;

/// Default SSH server port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Loopback address database traffic is redirected to when tunnelled
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// SSH authentication method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SshAuthMethod {
    /// Password authentication
    #[default]
    Password,
    /// Private key authentication
    #[serde(rename = "publickey")]
    PublicKey,
}

impl SshAuthMethod {
    /// Convert to string representation for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::PublicKey => "publickey",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "publickey" | "key" => Self::PublicKey,
            _ => Self::Password,
        }
    }
}

/// SSH tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Whether database traffic is routed through an SSH tunnel
    pub enabled: bool,
    /// SSH server hostname
    pub host: String,
    /// SSH server port
    pub port: u16,
    /// SSH user name
    pub user_name: String,
    /// Authentication method
    pub auth_method: SshAuthMethod,
    /// Path to the private key (publickey authentication)
    pub private_key_file: Option<PathBuf>,
    /// Prompt for the password or key passphrase on every connect
    pub ask_password: bool,
    /// Stored password or key passphrase (when not prompting)
    pub user_password: Option<String>,
    /// Secret entered at the prompt for this connect only
    #[serde(skip)]
    pub asked_password: Option<String>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: DEFAULT_SSH_PORT,
            user_name: String::new(),
            auth_method: SshAuthMethod::default(),
            private_key_file: None,
            ask_password: false,
            user_password: None,
            asked_password: None,
        }
    }
}

impl SshSettings {
    /// Create an enabled SSH tunnel configuration using password authentication.
    pub fn new(host: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            enabled: true,
            host: host.into(),
            user_name: user_name.into(),
            ..Self::default()
        }
    }

    /// Set the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use private key authentication.
    pub fn with_key(mut self, private_key_file: impl Into<PathBuf>) -> Self {
        self.auth_method = SshAuthMethod::PublicKey;
        self.private_key_file = Some(private_key_file.into());
        self
    }

    /// Prompt for the secret on every connect.
    pub fn asking_password(mut self) -> Self {
        self.ask_password = true;
        self
    }

    /// Whether the secret in play is a key passphrase rather than a password
    pub fn uses_key(&self) -> bool {
        self.auth_method == SshAuthMethod::PublicKey
    }

    /// The secret to authenticate with: the prompted one wins over the stored one.
    pub fn effective_secret(&self) -> Option<&str> {
        self.asked_password
            .as_deref()
            .or(self.user_password.as_deref())
    }
}

/// TLS configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SslSettings {
    /// Whether TLS is enabled
    pub ssl_enabled: bool,
    /// Whether a local PEM key file is used for client authentication
    pub use_pem_file: bool,
    /// Path to the PEM key file
    pub pem_key_file: Option<PathBuf>,
    /// Prompt for the PEM passphrase on every connect
    pub ask_passphrase: bool,
    /// Passphrase entered at the prompt for this connect only
    #[serde(skip)]
    pub pem_pass_phrase: Option<String>,
}

impl SslSettings {
    /// Whether connecting requires a PEM passphrase from the user
    pub fn needs_passphrase(&self) -> bool {
        self.ssl_enabled && self.use_pem_file && self.ask_passphrase
    }
}

/// Replica set topology
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaSetSettings {
    /// Member addresses (`host:port`)
    pub members: Vec<String>,
    /// Replica set name, if known
    pub set_name: Option<String>,
}

/// Everything needed to reach one database server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Human-readable connection name
    pub connection_name: String,
    /// Server hostname or IP
    pub server_host: String,
    /// Server port
    pub server_port: u16,
    /// Database selected when a shell opens
    pub default_database: String,
    /// Replica set topology; `None` for a direct connection
    pub replica_set: Option<ReplicaSetSettings>,
    /// SSH tunnel settings
    pub ssh: SshSettings,
    /// TLS settings
    pub ssl: SslSettings,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_name: String::new(),
            server_host: "localhost".to_string(),
            server_port: DEFAULT_SERVER_PORT,
            default_database: String::new(),
            replica_set: None,
            ssh: SshSettings::default(),
            ssl: SslSettings::default(),
        }
    }
}

impl ConnectionSettings {
    /// Create settings for a direct connection.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            connection_name: name.into(),
            server_host: host.into(),
            server_port: port,
            ..Self::default()
        }
    }

    /// Route the connection through an SSH tunnel.
    pub fn with_ssh(mut self, ssh: SshSettings) -> Self {
        self.ssh = ssh;
        self
    }

    /// Enable TLS.
    pub fn with_ssl(mut self, ssl: SslSettings) -> Self {
        self.ssl = ssl;
        self
    }

    /// Connect to a replica set instead of a single server.
    pub fn with_replica_set(mut self, members: Vec<String>) -> Self {
        self.replica_set = Some(ReplicaSetSettings {
            members,
            set_name: None,
        });
        self
    }

    /// Whether the target is a replica set
    pub fn is_replica_set(&self) -> bool {
        self.replica_set.is_some()
    }

    /// Whether opening this connection goes through an SSH tunnel.
    ///
    /// Tunnels are not supported for replica set topologies.
    pub fn uses_tunnel(&self) -> bool {
        self.ssh.enabled && !self.is_replica_set()
    }

    /// Replica set members, empty for a direct connection
    pub fn replica_members(&self) -> &[String] {
        self.replica_set
            .as_ref()
            .map(|rs| rs.members.as_slice())
            .unwrap_or(&[])
    }

    /// `host:port` of the direct server address
    pub fn full_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Address shown in diagnostics when connecting.
    pub fn display_address(&self) -> String {
        if self.is_replica_set() {
            let first = self.replica_members().first().map(String::as_str).unwrap_or("");
            format!("{} [Replica Set]{}", self.connection_name, first)
        } else {
            self.full_address()
        }
    }

    /// Point the connection at the local end of an established tunnel.
    pub fn redirect_to_tunnel(&mut self, local_port: u16) {
        self.server_host = LOOPBACK_HOST.to_string();
        self.server_port = local_port;
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.is_replica_set() {
            if self.replica_members().is_empty() {
                return Err(ProtocolError::InvalidSettings(
                    "Replica set requires at least one member".to_string(),
                ));
            }
        } else {
            if self.server_host.is_empty() {
                return Err(ProtocolError::InvalidSettings("Host is required".to_string()));
            }
            if self.server_port == 0 {
                return Err(ProtocolError::InvalidSettings("Port must be non-zero".to_string()));
            }
        }
        if self.ssh.enabled {
            if self.ssh.host.is_empty() {
                return Err(ProtocolError::InvalidSettings("SSH host is required".to_string()));
            }
            if self.ssh.user_name.is_empty() {
                return Err(ProtocolError::InvalidSettings(
                    "SSH user name is required".to_string(),
                ));
            }
            if self.ssh.uses_key() && self.ssh.private_key_file.is_none() {
                return Err(ProtocolError::InvalidSettings(
                    "Private key file is required for publickey authentication".to_string(),
                ));
            }
        }
        if self.ssl.ssl_enabled && self.ssl.use_pem_file && self.ssl.pem_key_file.is_none() {
            return Err(ProtocolError::InvalidSettings(
                "PEM key file is required when a PEM file is used".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunnelled() -> ConnectionSettings {
        ConnectionSettings::new("prod", "db.internal", 27017)
            .with_ssh(SshSettings::new("bastion.example.com", "deploy").asking_password())
    }

    #[test]
    fn test_clone_is_independent_of_original() {
        let original = tunnelled();
        let mut clone = original.clone();

        clone.ssh.host = "other-bastion".to_string();
        clone.ssh.port = 2200;
        clone.ssh.enabled = false;
        clone.ssh.asked_password = Some("secret".to_string());

        assert_eq!(original.ssh.host, "bastion.example.com");
        assert_eq!(original.ssh.port, DEFAULT_SSH_PORT);
        assert!(original.ssh.enabled);
        assert!(original.ssh.asked_password.is_none());
    }

    #[test]
    fn test_uses_tunnel() {
        assert!(tunnelled().uses_tunnel());
        assert!(!ConnectionSettings::new("local", "localhost", 27017).uses_tunnel());

        let replica = tunnelled().with_replica_set(vec!["a:27017".to_string()]);
        assert!(replica.ssh.enabled);
        assert!(!replica.uses_tunnel());
    }

    #[test]
    fn test_display_address() {
        let direct = ConnectionSettings::new("local", "localhost", 27018);
        assert_eq!(direct.display_address(), "localhost:27018");

        let replica = ConnectionSettings::new("cluster", "ignored", 1)
            .with_replica_set(vec!["a:27017".to_string(), "b:27017".to_string()]);
        assert_eq!(replica.display_address(), "cluster [Replica Set]a:27017");
    }

    #[test]
    fn test_redirect_to_tunnel() {
        let mut settings = tunnelled();
        settings.redirect_to_tunnel(40123);
        assert_eq!(settings.full_address(), "127.0.0.1:40123");
    }

    #[test]
    fn test_effective_secret_prefers_prompted() {
        let mut ssh = SshSettings::new("bastion", "deploy");
        assert_eq!(ssh.effective_secret(), None);

        ssh.user_password = Some("stored".to_string());
        assert_eq!(ssh.effective_secret(), Some("stored"));

        ssh.asked_password = Some("typed".to_string());
        assert_eq!(ssh.effective_secret(), Some("typed"));
    }

    #[test]
    fn test_prompted_secrets_are_not_serialized() {
        let mut settings = tunnelled();
        settings.ssh.asked_password = Some("typed".to_string());
        settings.ssl.pem_pass_phrase = Some("pem".to_string());

        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("typed"));
        assert!(!json.contains("\"pem\""));
    }

    #[test]
    fn test_auth_method_serde() {
        let json = serde_json::to_string(&SshAuthMethod::PublicKey).unwrap();
        assert_eq!(json, "\"publickey\"");
        assert_eq!(SshAuthMethod::parse("PublicKey"), SshAuthMethod::PublicKey);
        assert_eq!(SshAuthMethod::parse("anything"), SshAuthMethod::Password);
    }

    #[test]
    fn test_validate() {
        assert!(tunnelled().validate().is_ok());

        let mut missing_key = tunnelled();
        missing_key.ssh.auth_method = SshAuthMethod::PublicKey;
        assert!(missing_key.validate().is_err());

        let empty_replica = ConnectionSettings::new("rs", "", 0).with_replica_set(vec![]);
        assert!(empty_replica.validate().is_err());

        let mut pem = ConnectionSettings::new("tls", "localhost", 27017);
        pem.ssl.ssl_enabled = true;
        pem.ssl.use_pem_file = true;
        assert!(pem.validate().is_err());
    }
}
