//! Connection handles and the per-connection receive loop.
//!
//! Every connection, inbound or dialed, gets one handler task that owns the
//! read half exclusively. The write half lives in a [`ConnectionHandle`] that
//! senders reach through the registry; writes are serialized by an async
//! mutex so frames from concurrent senders never interleave.

use crate::error::WireError;
use crate::message::{decode_body, decode_header, CodecError, Message, HEADER_SIZE};
use crate::registry::ConnectionRegistry;
use crate::sink::{EventSink, UNKNOWN_PEER};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct HandleInner {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    writer: tokio::sync::Mutex<BoxedWriter>,
    close_tx: watch::Sender<bool>,
}

/// Cloneable handle to a live connection: its write side and close signal.
///
/// Holding a handle does not give read access; the handler task owns that.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionHandle {
    /// Wrap a write half. Returns the handle and the receiver its handler
    /// watches for local close requests.
    pub fn new<W>(writer: W, peer_addr: Option<SocketAddr>) -> (Self, watch::Receiver<bool>)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (close_tx, close_rx) = watch::channel(false);
        let handle = Self {
            inner: Arc::new(HandleInner {
                id: ConnectionId::next(),
                peer_addr,
                writer: tokio::sync::Mutex::new(Box::new(writer)),
                close_tx,
            }),
        };
        (handle, close_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Remote socket address, when the transport has one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// Write one complete frame. Partial writes are retried until the whole
    /// frame is out; anything short of that is an error.
    ///
    /// Closing the handle aborts a write in progress (or one waiting for the
    /// writer) with [`WireError::ConnectionClosed`], so a remote that stops
    /// reading cannot pin the connection open.
    pub async fn write_frame(&self, frame: &[u8]) -> Result<(), WireError> {
        let mut close_rx = self.inner.close_tx.subscribe();
        if *close_rx.borrow_and_update() {
            return Err(WireError::ConnectionClosed);
        }

        let mut writer = tokio::select! {
            _ = closed(&mut close_rx) => return Err(WireError::ConnectionClosed),
            writer = self.inner.writer.lock() => writer,
        };
        tokio::select! {
            _ = closed(&mut close_rx) => Err(WireError::ConnectionClosed),
            result = async {
                writer.write_all(frame).await?;
                writer.flush().await
            } => result.map_err(WireError::from),
        }
    }

    /// Ask the handler to tear this connection down.
    pub fn close(&self) {
        self.inner.close_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.close_tx.borrow()
    }

    /// Half-close the write side so the remote sees an orderly EOF.
    ///
    /// Must be called after [`ConnectionHandle::close`]: pending writes then
    /// give up the writer promptly.
    async fn shutdown(&self) {
        let mut writer = self.inner.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(id = %self.inner.id, error = %e, "write shutdown failed");
        }
    }
}

/// Resolve once the watched flag becomes `true` (or its sender is gone).
pub(crate) async fn closed(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[derive(Default)]
struct SetInner {
    live: HashMap<ConnectionId, ConnectionHandle>,
    tasks: Vec<JoinHandle<()>>,
    closing: bool,
}

/// Every connection a node currently has open, authenticated or not, plus
/// the handler tasks to join on shutdown.
#[derive(Clone, Default)]
pub(crate) struct ConnectionSet {
    inner: Arc<Mutex<SetInner>>,
}

impl ConnectionSet {
    /// Record `handle` and spawn its handler task in one step, so a
    /// concurrent [`ConnectionSet::close_all`] sees either both or neither.
    fn spawn<F>(&self, handle: ConnectionHandle, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closing {
            handle.close();
        }
        inner.live.insert(handle.id(), handle);
        inner.tasks.retain(|t| !t.is_finished());
        inner.tasks.push(tokio::spawn(task));
    }

    fn remove(&self, id: ConnectionId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.live.remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.live.len()
    }

    /// Signal every live connection to close and hand back the handler
    /// tasks for the caller to join. Connections added afterwards are closed
    /// as soon as they are spawned and their tasks are returned by the next
    /// call; callers drain until this comes back empty.
    pub(crate) fn close_all(&self) -> Vec<JoinHandle<()>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closing = true;
        for handle in inner.live.values() {
            handle.close();
        }
        std::mem::take(&mut inner.tasks)
    }
}

/// Shared state every handler task needs.
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) connections: ConnectionSet,
    /// Parent span for all connection tasks of one node.
    pub(crate) span: tracing::Span,
}

impl ConnectionContext {
    pub(crate) fn new(
        registry: ConnectionRegistry,
        sink: Arc<dyn EventSink>,
        span: tracing::Span,
    ) -> Self {
        Self {
            registry,
            sink,
            connections: ConnectionSet::default(),
            span,
        }
    }
}

/// Spawn the receive loop for a connection.
///
/// `known_name` is the name the connection was dialed under, if any; it is
/// used for the disconnect report when the registry no longer has an entry.
pub(crate) fn spawn_handler<R>(
    ctx: &ConnectionContext,
    handle: ConnectionHandle,
    close_rx: watch::Receiver<bool>,
    reader: R,
    known_name: Option<String>,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let span = tracing::info_span!(
        parent: &ctx.span,
        "connection",
        id = %handle.id(),
        addr = ?handle.peer_addr()
    );
    let handler = ConnectionHandler {
        ctx: ctx.clone(),
        handle: handle.clone(),
        close_rx,
        known_name,
    };
    ctx.connections.spawn(handle, handler.run(reader).instrument(span));
}

/// Why a receive loop ended.
enum Exit {
    PeerClosed,
    LocalClose,
    Protocol(CodecError),
    Transport(WireError),
}

struct ConnectionHandler {
    ctx: ConnectionContext,
    handle: ConnectionHandle,
    close_rx: watch::Receiver<bool>,
    known_name: Option<String>,
}

impl ConnectionHandler {
    async fn run<R: AsyncRead + Unpin>(mut self, mut reader: R) {
        let exit = loop {
            let next = tokio::select! {
                _ = closed(&mut self.close_rx) => None,
                result = read_message(&mut reader) => Some(result),
            };
            match next {
                None => break Exit::LocalClose,
                Some(Ok(Some(msg))) => self.dispatch(msg),
                Some(Ok(None)) => break Exit::PeerClosed,
                Some(Err(WireError::Codec(e))) => break Exit::Protocol(e),
                Some(Err(e)) => break Exit::Transport(e),
            }
        };

        match &exit {
            Exit::PeerClosed => debug!("peer closed the connection"),
            Exit::LocalClose => debug!("connection closed locally"),
            Exit::Protocol(e) => warn!(error = %e, "protocol violation, dropping connection"),
            Exit::Transport(e) => warn!(error = %e, "receive failed"),
        }
        drop(reader);
        self.finish().await;
    }

    fn dispatch(&mut self, msg: Message) {
        match msg {
            Message::Auth { name } => {
                info!(peer = %name, "received AUTH");
                self.ctx.registry.register(&name, self.handle.clone());
                self.ctx.sink.on_peer_authenticated(&name);
                self.known_name = Some(name);
            }
            Message::Text { text } => {
                let peer = self.peer_name();
                debug!(peer = %peer, len = text.len(), "received TEXT");
                self.ctx.sink.on_text_received(&peer, &text);
            }
            Message::Image { bytes } => {
                let peer = self.peer_name();
                debug!(peer = %peer, len = bytes.len(), "received IMAGE");
                self.ctx.sink.on_image_received(&peer, &bytes);
            }
        }
    }

    fn peer_name(&self) -> String {
        self.ctx
            .registry
            .lookup_name(self.handle.id())
            .unwrap_or_else(|| UNKNOWN_PEER.to_string())
    }

    async fn finish(self) {
        // A name that has since moved to another connection belongs to that
        // connection; reporting it here would announce a live peer as gone.
        let registry = &self.ctx.registry;
        let name = registry
            .unregister_handle(self.handle.id())
            .or_else(|| self.known_name.filter(|n| !registry.contains(n)))
            .unwrap_or_else(|| UNKNOWN_PEER.to_string());

        self.handle.close();
        self.handle.shutdown().await;
        self.ctx.connections.remove(self.handle.id());

        info!(peer = %name, "connection ended");
        self.ctx.sink.on_peer_disconnected(&name);
    }
}

/// Read one frame and decode it.
///
/// Returns `Ok(None)` on an orderly close (EOF before the first header
/// byte). EOF anywhere inside a frame is an I/O error.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("connection closed after {filled} of {HEADER_SIZE} header bytes"),
            )));
        }
        filled += n;
    }

    let header = decode_header(&header)?;
    let mut body = vec![0u8; header.body_len()];
    reader.read_exact(&mut body).await?;

    Ok(Some(decode_body(header.message_type, &body)?))
}

/// Encode a message and write it through `handle`.
///
/// Fails with [`WireError::ConnectionClosed`] if the handle was already
/// closed; nothing is encoded in that case.
pub async fn write_message(handle: &ConnectionHandle, msg: &Message) -> Result<(), WireError> {
    if handle.is_closed() {
        return Err(WireError::ConnectionClosed);
    }
    let frame = crate::message::encode_message(msg)?;
    handle.write_frame(&frame).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{encode_message, LENGTH_BIAS};
    use crate::sink::{ChannelSink, PeerEvent};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn context() -> (ConnectionContext, UnboundedReceiver<PeerEvent>) {
        let (sink, rx) = ChannelSink::new();
        let ctx = ConnectionContext::new(
            ConnectionRegistry::new(),
            Arc::new(sink),
            tracing::Span::none(),
        );
        (ctx, rx)
    }

    /// Spawn a handler on one end of an in-memory pipe; return the other end.
    fn spawn_pipe(
        ctx: &ConnectionContext,
        known_name: Option<&str>,
    ) -> (DuplexStream, ConnectionHandle) {
        let (client, server) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(server);
        let (handle, close_rx) = ConnectionHandle::new(writer, None);
        spawn_handler(ctx, handle.clone(), close_rx, reader, known_name.map(String::from));
        (client, handle)
    }

    async fn next(rx: &mut UnboundedReceiver<PeerEvent>) -> PeerEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("sink closed")
    }

    async fn assert_quiet(rx: &mut UnboundedReceiver<PeerEvent>) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "unexpected extra event");
    }

    #[tokio::test]
    async fn test_auth_then_text_then_close() {
        let (ctx, mut rx) = context();
        let (mut client, _handle) = spawn_pipe(&ctx, None);

        client.write_all(&encode_message(&Message::auth("bob")).unwrap()).await.unwrap();
        client.write_all(&encode_message(&Message::text("hi")).unwrap()).await.unwrap();

        assert_eq!(next(&mut rx).await, PeerEvent::Authenticated("bob".into()));
        assert_eq!(
            next(&mut rx).await,
            PeerEvent::Text {
                peer: "bob".into(),
                text: "hi".into()
            }
        );
        assert!(ctx.registry.contains("bob"));

        drop(client);
        assert_eq!(next(&mut rx).await, PeerEvent::Disconnected("bob".into()));
        assert!(!ctx.registry.contains("bob"));
        assert_quiet(&mut rx).await;
        assert_eq!(ctx.connections.len(), 0);
    }

    #[tokio::test]
    async fn test_text_before_auth_uses_sentinel() {
        let (ctx, mut rx) = context();
        let (mut client, _handle) = spawn_pipe(&ctx, None);

        client.write_all(&encode_message(&Message::image(vec![1, 2, 3])).unwrap()).await.unwrap();
        assert_eq!(
            next(&mut rx).await,
            PeerEvent::Image {
                peer: UNKNOWN_PEER.into(),
                bytes: vec![1, 2, 3]
            }
        );

        drop(client);
        assert_eq!(next(&mut rx).await, PeerEvent::Disconnected(UNKNOWN_PEER.into()));
    }

    #[tokio::test]
    async fn test_malformed_header_closes_connection() {
        let (ctx, mut rx) = context();
        let (mut client, _handle) = spawn_pipe(&ctx, None);

        let mut bogus = Vec::new();
        bogus.extend_from_slice(&42u32.to_be_bytes());
        bogus.extend_from_slice(&(LENGTH_BIAS + 16).to_be_bytes());
        client.write_all(&bogus).await.unwrap();

        assert_eq!(next(&mut rx).await, PeerEvent::Disconnected(UNKNOWN_PEER.into()));
        // The handler shut its write side down: we see EOF.
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_type_closes_connection() {
        let (ctx, mut rx) = context();
        let (mut client, _handle) = spawn_pipe(&ctx, None);

        client.write_all(&encode_message(&Message::auth("eve")).unwrap()).await.unwrap();
        assert_eq!(next(&mut rx).await, PeerEvent::Authenticated("eve".into()));

        let mut frame = Vec::new();
        frame.extend_from_slice(&0u32.to_be_bytes());
        frame.extend_from_slice(&(LENGTH_BIAS + HEADER_SIZE as u32 + 1).to_be_bytes());
        frame.push(0xc0);
        client.write_all(&frame).await.unwrap();

        assert_eq!(next(&mut rx).await, PeerEvent::Disconnected("eve".into()));
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_local_close_unblocks_reader() {
        let (ctx, mut rx) = context();
        let (_client, handle) = spawn_pipe(&ctx, Some("carol"));
        ctx.registry.register("carol", handle.clone());

        handle.close();
        assert_eq!(next(&mut rx).await, PeerEvent::Disconnected("carol".into()));
        assert!(ctx.registry.lookup_handle("carol").is_none());
        assert!(handle.write_frame(b"late").await.is_err());
        assert!(matches!(
            write_message(&handle, &Message::text("late")).await,
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_name_falls_back_to_dialed_name() {
        let (ctx, mut rx) = context();
        let (_client, handle) = spawn_pipe(&ctx, Some("dave"));
        ctx.registry.register("dave", handle.clone());

        // Explicit teardown unregisters before the handler notices.
        ctx.registry.unregister("dave");
        handle.close();
        assert_eq!(next(&mut rx).await, PeerEvent::Disconnected("dave".into()));
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn test_stale_connection_does_not_report_moved_name() {
        let (ctx, mut rx) = context();
        let (mut first, _first_handle) = spawn_pipe(&ctx, None);
        let (mut second, second_handle) = spawn_pipe(&ctx, None);

        let auth = encode_message(&Message::auth("bob")).unwrap();
        first.write_all(&auth).await.unwrap();
        assert_eq!(next(&mut rx).await, PeerEvent::Authenticated("bob".into()));
        second.write_all(&auth).await.unwrap();
        assert_eq!(next(&mut rx).await, PeerEvent::Authenticated("bob".into()));

        drop(first);
        assert_eq!(next(&mut rx).await, PeerEvent::Disconnected(UNKNOWN_PEER.into()));
        assert_eq!(
            ctx.registry.lookup_handle("bob").unwrap().id(),
            second_handle.id()
        );
        assert_quiet(&mut rx).await;

        drop(second);
        assert_eq!(next(&mut rx).await, PeerEvent::Disconnected("bob".into()));
    }

    #[tokio::test]
    async fn test_close_aborts_blocked_write() {
        let (ctx, mut rx) = context();
        // Tiny pipe and a remote that never reads: the write parks.
        let (mut client, server) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(server);
        let (handle, close_rx) = ConnectionHandle::new(writer, None);
        spawn_handler(&ctx, handle.clone(), close_rx, reader, Some("slow".into()));

        let sender = handle.clone();
        let send = tokio::spawn(async move {
            write_message(&sender, &Message::image(vec![7u8; 64 * 1024])).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!send.is_finished());

        handle.close();
        let result = tokio::time::timeout(Duration::from_secs(5), send)
            .await
            .expect("blocked write was not aborted")
            .unwrap();
        assert!(matches!(result, Err(WireError::ConnectionClosed)));
        assert_eq!(next(&mut rx).await, PeerEvent::Disconnected("slow".into()));

        // The write side was shut down: the remote drains to EOF.
        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut received))
            .await
            .expect("remote never saw EOF")
            .unwrap();
        assert!(received.len() < 64 * 1024);
    }

    #[tokio::test]
    async fn test_connection_spawned_while_closing_is_joined() {
        let (ctx, mut rx) = context();
        assert!(ctx.connections.close_all().is_empty());

        // Arrives after shutdown began: closed at once, task still handed back.
        let (_client, handle) = spawn_pipe(&ctx, Some("late"));
        assert!(handle.is_closed());
        let tasks = ctx.connections.close_all();
        assert_eq!(tasks.len(), 1);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(next(&mut rx).await, PeerEvent::Disconnected("late".into()));
        assert_eq!(ctx.connections.len(), 0);
    }

    #[tokio::test]
    async fn test_write_message_reaches_remote() {
        let (ctx, _rx) = context();
        let (mut client, handle) = spawn_pipe(&ctx, None);

        write_message(&handle, &Message::text("pong")).await.unwrap();
        let received = read_message(&mut client).await.unwrap().unwrap();
        assert_eq!(received, Message::text("pong"));
    }

    #[tokio::test]
    async fn test_partial_reads_reassemble() {
        let msg = Message::image((0..=255u8).cycle().take(1000).collect::<Vec<_>>());
        let frame = encode_message(&msg).unwrap();

        let mut single = tokio_test::io::Builder::new().read(&frame).build();
        let whole = read_message(&mut single).await.unwrap().unwrap();

        let mut pieces = tokio_test::io::Builder::new()
            .read(&frame[..3])
            .read(&frame[3..5])
            .read(&frame[5..HEADER_SIZE + 1])
            .read(&frame[HEADER_SIZE + 1..400])
            .read(&frame[400..401])
            .read(&frame[401..])
            .build();
        let reassembled = read_message(&mut pieces).await.unwrap().unwrap();

        assert_eq!(whole, msg);
        assert_eq!(reassembled, whole);
    }

    #[tokio::test]
    async fn test_zero_byte_read_is_orderly_close() {
        let mut empty = tokio_test::io::Builder::new().build();
        assert!(read_message(&mut empty).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_header_is_error() {
        let mut short = tokio_test::io::Builder::new().read(&[0, 0, 0]).build();
        let err = read_message(&mut short).await.unwrap_err();
        assert!(matches!(
            err,
            WireError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_body_is_error() {
        let frame = encode_message(&Message::text("truncated body")).unwrap();
        let mut short = tokio_test::io::Builder::new()
            .read(&frame[..frame.len() - 2])
            .build();
        assert!(matches!(
            read_message(&mut short).await,
            Err(WireError::Io(_))
        ));
    }
}
