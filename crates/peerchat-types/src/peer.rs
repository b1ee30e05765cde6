//! Peer directory entries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote endpoint identified by a symbolic name.
///
/// The name is the identity key: the wire core uses it to look up live
/// connections. Address and port only matter when dialing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    /// Symbolic name, unique within a peer directory.
    pub name: String,
    /// Host name or IP literal.
    pub address: String,
    /// TCP port the peer listens on.
    pub port: u16,
}

impl Peer {
    /// Create a peer entry.
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
        }
    }

    /// `address:port`, suitable for DNS resolution.
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            // Bare IPv6 literal.
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.endpoint())
    }
}
