//! Harbor configuration file

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use hb_protocol::ConnectionSettings;

use super::timeout;
use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarborConfig {
    /// Capacity of the broadcast channel for published events
    pub event_capacity: usize,

    /// Capacity of the orchestrator command channel
    pub command_capacity: usize,

    /// Transport worker settings
    pub transport: TransportConfig,

    /// Tunnel worker settings
    pub tunnel: TunnelConfig,

    /// Named connection profiles
    pub connections: BTreeMap<String, ConnectionSettings>,
}

impl Default for HarborConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            command_capacity: 256,
            transport: TransportConfig::default(),
            tunnel: TunnelConfig::default(),
            connections: BTreeMap::new(),
        }
    }
}

impl HarborConfig {
    /// Look up a connection profile by name
    pub fn connection(&self, name: &str) -> Result<&ConnectionSettings, ConfigError> {
        self.connections
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    /// Validate channel capacities and every profile
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 || self.command_capacity == 0 {
            return Err(ConfigError::Invalid(
                "Channel capacities must be non-zero".to_string(),
            ));
        }
        for (name, settings) in &self.connections {
            settings
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("profile '{}': {}", name, e)))?;
        }
        Ok(())
    }
}

/// Transport worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Timeout for one connection attempt
    #[serde(with = "timeout")]
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Tunnel worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Timeout for reaching and authenticating with the SSH server
    #[serde(with = "timeout")]
    pub connect_timeout: Duration,

    /// Expected SSH host key fingerprint; any key is accepted when unset
    pub host_key: Option<String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            host_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [transport]
            connect_timeout = 5

            [connections.local]
            connection_name = "local"
            server_host = "127.0.0.1"
            server_port = 27018
        "#;

        let config: HarborConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.transport.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.tunnel.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.event_capacity, 1024);

        let local = config.connection("local").unwrap();
        assert_eq!(local.full_address(), "127.0.0.1:27018");
        assert!(!local.ssh.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_profile() {
        let config = HarborConfig::default();
        assert!(matches!(
            config.connection("nope"),
            Err(ConfigError::UnknownProfile(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_profile() {
        let mut config = HarborConfig::default();
        config
            .connections
            .insert("broken".to_string(), ConnectionSettings::new("broken", "", 27017));
        assert!(config.validate().is_err());
    }
}
