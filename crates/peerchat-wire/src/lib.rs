//! PeerChat wire core: peer-to-peer messaging over TCP.
//!
//! Every endpoint listens for inbound connections and dials named peers at
//! the same time, exchanging AUTH, TEXT and IMAGE messages over a
//! length-prefixed binary protocol.
//!
//! ## Architecture
//!
//! - **message**: frame codec (fixed header + MessagePack body)
//! - **ConnectionRegistry**: peer name ↔ live connection, both directions
//! - **connection**: per-connection receive loop and write handle
//! - **listener**: bind + accept loop
//! - **session**: outbound dialing and send-by-name
//! - **PeerNode**: the public endpoint tying them together
//! - **EventSink**: trait the front-end implements to receive events

pub mod connection;
pub mod error;
pub mod listener;
pub mod message;
pub mod node;
pub mod registry;
mod session;
pub mod sink;

pub use connection::{ConnectionHandle, ConnectionId};
pub use error::WireError;
pub use listener::ListenerState;
pub use message::{CodecError, Message, MessageHeader, MessageType};
pub use node::{NodeConfig, PeerNode};
pub use peerchat_types::Peer;
pub use registry::ConnectionRegistry;
pub use sink::{ChannelSink, EventSink, PeerEvent, UNKNOWN_PEER};
