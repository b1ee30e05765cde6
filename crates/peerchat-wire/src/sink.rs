//! Inbound-event sink: how the wire core reports protocol events.
//!
//! Callbacks run inline on the task that received the frame. A slow
//! implementation stalls that connection's read loop (other connections keep
//! going on their own tasks); hand work off to a channel if it may block.
//! [`ChannelSink`] does exactly that.

use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Sentinel peer name for connections that never sent AUTH.
pub const UNKNOWN_PEER: &str = "unknown";

/// Receiver of protocol-level events, implemented by the front-end.
pub trait EventSink: Send + Sync + 'static {
    /// The listener is bound and about to accept connections.
    fn on_bind_succeeded(&self, local_addr: SocketAddr) {
        let _ = local_addr;
    }

    /// A peer announced itself with AUTH.
    fn on_peer_authenticated(&self, peer_name: &str);

    /// A TEXT message arrived.
    fn on_text_received(&self, peer_name: &str, text: &str);

    /// An IMAGE message arrived.
    fn on_image_received(&self, peer_name: &str, bytes: &[u8]);

    /// A connection ended. Fires exactly once per connection.
    fn on_peer_disconnected(&self, peer_name: &str);
}

/// An event as delivered by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    BindSucceeded(SocketAddr),
    Authenticated(String),
    Text { peer: String, text: String },
    Image { peer: String, bytes: Vec<u8> },
    Disconnected(String),
}

/// Sink that forwards every event into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: PeerEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl EventSink for ChannelSink {
    fn on_bind_succeeded(&self, local_addr: SocketAddr) {
        self.emit(PeerEvent::BindSucceeded(local_addr));
    }

    fn on_peer_authenticated(&self, peer_name: &str) {
        self.emit(PeerEvent::Authenticated(peer_name.to_string()));
    }

    fn on_text_received(&self, peer_name: &str, text: &str) {
        self.emit(PeerEvent::Text {
            peer: peer_name.to_string(),
            text: text.to_string(),
        });
    }

    fn on_image_received(&self, peer_name: &str, bytes: &[u8]) {
        self.emit(PeerEvent::Image {
            peer: peer_name.to_string(),
            bytes: bytes.to_vec(),
        });
    }

    fn on_peer_disconnected(&self, peer_name: &str) {
        self.emit(PeerEvent::Disconnected(peer_name.to_string()));
    }
}
