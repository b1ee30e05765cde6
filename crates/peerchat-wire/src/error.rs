//! Errors from the wire layer.

use crate::message::CodecError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from the wire protocol layer.
///
/// `Bind` is fatal for the node. `Io`, `Resolve`, `Connect` and
/// `ConnectionClosed` are scoped to a single connection. `Codec` is a
/// protocol violation. `UnknownPeer` and `Stopped` are caller errors and have
/// no side effects.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Cannot resolve {endpoint}: {reason}")]
    Resolve { endpoint: String, reason: String },
    #[error("Cannot connect to {peer} at {endpoint}: {source}")]
    Connect {
        peer: String,
        endpoint: String,
        source: std::io::Error,
    },
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Node is stopped")]
    Stopped,
}

impl WireError {
    /// Whether this error ends the whole node rather than one connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WireError::Bind { .. })
    }
}
