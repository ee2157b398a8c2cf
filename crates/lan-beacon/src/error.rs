// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery error types.
//!
//! Only usage errors reach the caller. Setup failures (bind, group join) and
//! transient I/O failures are logged by the background loops instead, so a
//! process that cannot listen can still announce itself and vice versa.

use crate::config::ConfigError;

/// Discovery service error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The service was disposed.
    Disposed,
    /// A loop was started outside of a tokio runtime.
    NoRuntime,
    /// The peer address cannot be announced (empty or larger than a datagram).
    InvalidAddress(String),
    /// Invalid configuration.
    Config(String),
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disposed => write!(f, "Discovery service disposed"),
            Self::NoRuntime => write!(f, "No tokio runtime available"),
            Self::InvalidAddress(s) => write!(f, "Invalid peer address: {}", s),
            Self::Config(s) => write!(f, "Configuration error: {}", s),
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl From<ConfigError> for DiscoveryError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_error_display() {
        assert!(DiscoveryError::Disposed.to_string().contains("disposed"));
        assert!(DiscoveryError::InvalidAddress("empty".into())
            .to_string()
            .contains("empty"));
    }

    #[test]
    fn test_from_config_error() {
        let err: DiscoveryError = ConfigError::InvalidValue("port cannot be 0".into()).into();
        assert_eq!(
            err,
            DiscoveryError::Config("Invalid value: port cannot be 0".into())
        );
    }
}
