//! PeerNode: the local messaging endpoint.
//!
//! A [`PeerNode`] binds a local TCP listener and accepts incoming connections
//! from other endpoints. It also dials named peers. Every connection, in
//! either direction, runs its own receive loop and reports what it sees to
//! the [`EventSink`] supplied at startup.

use crate::connection::{ConnectionContext, ConnectionId};
use crate::error::WireError;
use crate::listener::{Listener, ListenerState};
use crate::message::Message;
use crate::registry::ConnectionRegistry;
use crate::session::SessionManager;
use crate::sink::EventSink;

use peerchat_types::config::DEFAULT_LISTEN_PORT;
use peerchat_types::Peer;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::{info, Instrument};

/// Configuration for a PeerNode.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to bind the listener on.
    pub listen_addr: SocketAddr,
}

impl NodeConfig {
    /// Listen on every interface at `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::with_port(DEFAULT_LISTEN_PORT)
    }
}

/// The local network node: listens for connections and connects to peers.
pub struct PeerNode {
    listener: Listener,
    sessions: SessionManager,
    ctx: ConnectionContext,
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
}

impl PeerNode {
    /// Bind, notify the sink, and start accepting connections.
    ///
    /// A bind failure is returned as [`WireError::Bind`]; the node never
    /// retries on its own.
    pub async fn start(
        config: NodeConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>, WireError> {
        let listener = Listener::new(config.listen_addr);
        let tcp = listener.bind().await?;
        let local_addr = tcp.local_addr()?;

        let span = tracing::info_span!("peer_node", port = local_addr.port());
        let ctx = ConnectionContext::new(ConnectionRegistry::new(), sink, span);

        info!(parent: &ctx.span, %local_addr, "waiting for connections");
        ctx.sink.on_bind_succeeded(local_addr);
        listener.spawn_accept_loop(tcp, ctx.clone());

        Ok(Arc::new(Self {
            listener,
            sessions: SessionManager::new(ctx.clone()),
            ctx,
            local_addr,
        }))
    }

    /// Shorthand for [`PeerNode::start`] on all interfaces at `port`.
    pub async fn listen(port: u16, sink: Arc<dyn EventSink>) -> Result<Arc<Self>, WireError> {
        Self::start(NodeConfig::with_port(port), sink).await
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current listener lifecycle state.
    pub fn state(&self) -> ListenerState {
        self.listener.state()
    }

    /// Whether inbound connections are still being accepted. Turns false
    /// after `stop`, or earlier if the accept loop gave up on an error.
    pub fn is_accepting(&self) -> bool {
        self.listener.is_accepting()
    }

    /// Get a reference to the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.ctx.registry
    }

    /// Names of every peer with a live, named connection.
    pub fn connected_peers(&self) -> Vec<String> {
        self.ctx.registry.names()
    }

    /// Number of open connections, named or not.
    pub fn connection_count(&self) -> usize {
        self.ctx.connections.len()
    }

    fn ensure_running(&self) -> Result<(), WireError> {
        if self.state() == ListenerState::Stopped {
            return Err(WireError::Stopped);
        }
        Ok(())
    }

    /// Dial `peer` and register the connection under `peer.name`.
    ///
    /// Nothing is sent; announcing ourselves with AUTH is the caller's call.
    pub async fn connect_peer(&self, peer: &Peer) -> Result<ConnectionId, WireError> {
        self.ensure_running()?;
        self.sessions
            .connect(peer)
            .instrument(self.ctx.span.clone())
            .await
    }

    /// Send a message to a connected peer by name.
    pub async fn send_message(&self, peer_name: &str, msg: &Message) -> Result<(), WireError> {
        self.ensure_running()?;
        self.sessions
            .send(peer_name, msg)
            .instrument(self.ctx.span.clone())
            .await
    }

    /// Close the connection to `peer` and forget it. Returns whether the
    /// peer was connected.
    pub fn disconnect(&self, peer: &Peer) -> bool {
        self.disconnect_name(&peer.name)
    }

    /// Same as [`PeerNode::disconnect`], by name.
    pub fn disconnect_name(&self, peer_name: &str) -> bool {
        self.sessions.disconnect(peer_name)
    }

    /// Stop accepting, close every connection, and wait for all handler
    /// tasks to finish. Safe to call more than once.
    pub async fn stop(&self) {
        async {
            if !self.listener.stop().await {
                info!("not listening, nothing to stop");
                return;
            }

            info!("disconnecting from all peers and shutting down networking");
            // A connection accepted or dialed while we were closing lands in
            // the next batch.
            loop {
                let tasks = self.ctx.connections.close_all();
                if tasks.is_empty() {
                    break;
                }
                for task in tasks {
                    let _ = task.await;
                }
            }
            self.ctx.registry.clear();
            info!("networking stopped");
        }
        .instrument(self.ctx.span.clone())
        .await
    }
}
