//! Shared value types for PeerChat.
//!
//! This crate holds the data structures exchanged between the wire core and
//! its front-ends: peer directory entries and configuration. It contains no
//! networking logic.

pub mod config;
pub mod peer;

pub use config::{ChatConfig, ConfigError, LoggingConfig, PeerConfig};
pub use peer::Peer;
