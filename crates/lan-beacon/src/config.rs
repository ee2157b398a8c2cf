// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery configuration.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Default discovery port.
pub const DEFAULT_DISCOVERY_PORT: u16 = 5001;

/// Default multicast group.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 0, 0, 1);

/// Default interval between two announcements.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5);

/// Largest accepted capacity of the discovered-host event channel.
pub const MAX_EVENT_CAPACITY: usize = 65_536;

/// How announcements are addressed.
///
/// Broadcast and multicast participants cannot see each other, so a
/// deployment picks exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Subnet broadcast (255.255.255.255).
    Broadcast,
    /// Multicast group.
    #[default]
    Multicast,
}

impl std::fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Broadcast => write!(f, "broadcast"),
            Self::Multicast => write!(f, "multicast"),
        }
    }
}

impl std::str::FromStr for DiscoveryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "broadcast" | "b" => Ok(Self::Broadcast),
            "multicast" | "m" => Ok(Self::Multicast),
            _ => Err(ConfigError::InvalidValue(format!(
                "unknown discovery mode: {}",
                s
            ))),
        }
    }
}

/// Discovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Broadcast or multicast addressing (default: multicast)
    #[serde(default)]
    pub mode: DiscoveryMode,

    /// UDP port shared by every participant (default: 5001)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Multicast group, used in multicast mode only (default: 239.0.0.1)
    #[serde(default = "default_multicast_group")]
    pub multicast_group: Ipv4Addr,

    /// Interval between announcements in milliseconds
    #[serde(default = "default_announce_interval_ms")]
    pub announce_interval_ms: u64,

    /// Capacity of the discovered-host event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Allow several listeners on one host to share the port
    #[serde(default = "default_true")]
    pub reuse_address: bool,

    /// Multicast TTL (1 = local link only)
    #[serde(default = "default_multicast_ttl")]
    pub multicast_ttl: u32,

    /// Loop our own multicast announcements back to local listeners
    #[serde(default = "default_true")]
    pub multicast_loop: bool,

    /// Interface for multicast membership (0.0.0.0 = let the OS pick)
    #[serde(default = "default_interface")]
    pub interface: Ipv4Addr,
}

fn default_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}

fn default_multicast_group() -> Ipv4Addr {
    DEFAULT_MULTICAST_GROUP
}

fn default_announce_interval_ms() -> u64 {
    DEFAULT_ANNOUNCE_INTERVAL.as_millis() as u64
}

fn default_event_capacity() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_multicast_ttl() -> u32 {
    1
}

fn default_interface() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::default(),
            port: default_port(),
            multicast_group: default_multicast_group(),
            announce_interval_ms: default_announce_interval_ms(),
            event_capacity: default_event_capacity(),
            reuse_address: true,
            multicast_ttl: default_multicast_ttl(),
            multicast_loop: true,
            interface: default_interface(),
        }
    }
}

impl DiscoveryConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Get announce interval as Duration.
    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if !self.multicast_group.is_multicast() {
            return Err(ConfigError::InvalidValue(format!(
                "{} is not a multicast address",
                self.multicast_group
            )));
        }
        if self.announce_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "announce_interval_ms cannot be 0".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "event_capacity cannot be 0".into(),
            ));
        }
        if self.event_capacity > MAX_EVENT_CAPACITY {
            return Err(ConfigError::InvalidValue(format!(
                "event_capacity cannot exceed {}",
                MAX_EVENT_CAPACITY
            )));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.port, 5001);
        assert_eq!(config.mode, DiscoveryMode::Multicast);
        assert_eq!(config.multicast_group, Ipv4Addr::new(239, 0, 0, 1));
        assert_eq!(config.announce_interval(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DiscoveryConfig =
            serde_json::from_str(r#"{"mode": "broadcast", "port": 15001}"#).unwrap();
        assert_eq!(config.mode, DiscoveryMode::Broadcast);
        assert_eq!(config.port, 15001);
        assert_eq!(config.multicast_group, DEFAULT_MULTICAST_GROUP);
        assert!(config.reuse_address);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.json");

        let config = DiscoveryConfig {
            mode: DiscoveryMode::Broadcast,
            port: 6001,
            announce_interval_ms: 250,
            ..Default::default()
        };
        config.to_file(&path).unwrap();

        let loaded = DiscoveryConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DiscoveryConfig::from_file(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_validation_port_zero() {
        let config = DiscoveryConfig {
            port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_unicast_group() {
        let config = DiscoveryConfig {
            multicast_group: Ipv4Addr::new(10, 0, 0, 1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_interval() {
        let config = DiscoveryConfig {
            announce_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_event_capacity_bounds() {
        let mut config = DiscoveryConfig {
            event_capacity: MAX_EVENT_CAPACITY,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.event_capacity = MAX_EVENT_CAPACITY + 1;
        assert!(config.validate().is_err());

        let huge: DiscoveryConfig =
            serde_json::from_str(&format!(r#"{{"event_capacity": {}}}"#, usize::MAX)).unwrap();
        assert!(matches!(
            huge.validate(),
            Err(ConfigError::InvalidValue(msg)) if msg.contains("event_capacity")
        ));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!(
            "Broadcast".parse::<DiscoveryMode>().unwrap(),
            DiscoveryMode::Broadcast
        );
        assert_eq!("m".parse::<DiscoveryMode>().unwrap(), DiscoveryMode::Multicast);
        assert!("anycast".parse::<DiscoveryMode>().is_err());
    }
}
