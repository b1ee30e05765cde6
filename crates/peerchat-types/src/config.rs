//! Configuration for a PeerChat endpoint.
//!
//! Deserialized from TOML. Every field has a default so a partial (or empty)
//! file is valid.

use crate::peer::Peer;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// Default TCP port for inbound connections.
pub const DEFAULT_LISTEN_PORT: u16 = 5000;

/// Errors from parsing or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Name announced to peers in the AUTH handshake.
    pub name: String,
    /// Local address to bind the listener on.
    pub listen_address: String,
    /// Local port to bind the listener on.
    pub listen_port: u16,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Log output settings.
    pub logging: LoggingConfig,
    /// Known peers.
    pub peers: Vec<PeerConfig>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            name: "peerchat".to_string(),
            listen_address: "0.0.0.0".to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            log_level: "info".to_string(),
            logging: LoggingConfig::default(),
            peers: Vec::new(),
        }
    }
}

/// Where log lines go.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// A peer directory entry as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub address: String,
    pub port: u16,
    /// Connect (and authenticate) at startup.
    #[serde(default)]
    pub autoconnect: bool,
}

impl PeerConfig {
    /// The immutable peer value the wire core dials.
    pub fn to_peer(&self) -> Peer {
        Peer::new(&self.name, &self.address, self.port)
    }
}

impl ChatConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ChatConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for peer in &self.peers {
            if peer.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "peer at {}:{} has an empty name",
                    peer.address, peer.port
                )));
            }
            if !seen.insert(peer.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate peer name '{}'",
                    peer.name
                )));
            }
        }
        Ok(())
    }

    /// Look up a configured peer by name.
    pub fn peer(&self, name: &str) -> Option<Peer> {
        self.peers
            .iter()
            .find(|p| p.name == name)
            .map(PeerConfig::to_peer)
    }

    /// `listen_address:listen_port`.
    pub fn listen_endpoint(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }
}
