//! Outbound side: dial named peers and send messages by name.

use crate::connection::{
    spawn_handler, write_message, ConnectionContext, ConnectionHandle, ConnectionId,
};
use crate::error::WireError;
use crate::message::Message;

use peerchat_types::Peer;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Dials peers, registers the resulting connections, and routes sends.
pub(crate) struct SessionManager {
    ctx: ConnectionContext,
}

impl SessionManager {
    pub(crate) fn new(ctx: ConnectionContext) -> Self {
        Self { ctx }
    }

    /// Connect to `peer` and register the connection under its name.
    ///
    /// A name that already has a live connection is reused without dialing.
    /// On failure nothing is registered.
    pub(crate) async fn connect(&self, peer: &Peer) -> Result<ConnectionId, WireError> {
        if let Some(existing) = self.ctx.registry.lookup_handle(&peer.name) {
            if !existing.is_closed() {
                debug!(peer = %peer.name, id = %existing.id(), "already connected");
                return Ok(existing.id());
            }
        }

        let endpoint = peer.endpoint();
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&endpoint)
            .await
            .map_err(|e| WireError::Resolve {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(WireError::Resolve {
                endpoint,
                reason: "no addresses found".to_string(),
            });
        }

        let stream = match TcpStream::connect(&addrs[..]).await {
            Ok(stream) => stream,
            Err(source) => {
                warn!(peer = %peer.name, %endpoint, error = %source, "cannot connect");
                return Err(WireError::Connect {
                    peer: peer.name.clone(),
                    endpoint,
                    source,
                });
            }
        };
        let peer_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let (handle, close_rx) = ConnectionHandle::new(writer, peer_addr);
        let id = handle.id();

        self.ctx.registry.register(&peer.name, handle.clone());
        spawn_handler(&self.ctx, handle, close_rx, reader, Some(peer.name.clone()));

        info!(peer = %peer.name, %endpoint, %id, "connected to peer");
        Ok(id)
    }

    /// Send `msg` to the connection registered under `peer_name`.
    ///
    /// A write that does not complete closes the connection: the stream may
    /// hold a partial frame and can no longer be parsed by the remote.
    pub(crate) async fn send(&self, peer_name: &str, msg: &Message) -> Result<(), WireError> {
        let handle = self
            .ctx
            .registry
            .lookup_handle(peer_name)
            .ok_or_else(|| WireError::UnknownPeer(peer_name.to_string()))?;

        debug!(peer = %peer_name, kind = %msg.message_type(), "sending");
        match write_message(&handle, msg).await {
            Ok(()) => Ok(()),
            Err(e @ (WireError::Codec(_) | WireError::ConnectionClosed)) => Err(e),
            Err(e) => {
                warn!(peer = %peer_name, error = %e, "send failed, closing connection");
                handle.close();
                Err(e)
            }
        }
    }

    /// Unregister `peer_name` and close its connection. Returns whether a
    /// connection was found.
    pub(crate) fn disconnect(&self, peer_name: &str) -> bool {
        match self.ctx.registry.unregister(peer_name) {
            Some(handle) => {
                info!(peer = %peer_name, id = %handle.id(), "disconnecting");
                handle.close();
                true
            }
            None => false,
        }
    }
}
