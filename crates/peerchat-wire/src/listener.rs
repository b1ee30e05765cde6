//! Inbound side: bind, accept, and hand each socket to a connection handler.

use crate::connection::{closed, spawn_handler, ConnectionContext, ConnectionHandle};
use crate::error::WireError;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, Instrument};

/// Bind/stop lifecycle of a [`Listener`].
///
/// `Listening` means the socket was bound and `stop` has not run yet. An
/// accept loop that ended on its own after an accept error leaves the state
/// at `Listening` (so `stop` still tears the connections down); ask
/// [`PeerNode::is_accepting`](crate::PeerNode::is_accepting) whether new
/// connections are still being taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Binding,
    Listening,
    Stopped,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerState::Created => write!(f, "created"),
            ListenerState::Binding => write!(f, "binding"),
            ListenerState::Listening => write!(f, "listening"),
            ListenerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Owns the listening socket (through its accept task) and its lifecycle.
pub(crate) struct Listener {
    addr: SocketAddr,
    state: Mutex<ListenerState>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    pub(crate) fn new(addr: SocketAddr) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            addr,
            state: Mutex::new(ListenerState::Created),
            shutdown_tx,
            accept_task: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ListenerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ListenerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Bind the configured address.
    ///
    /// Failure leaves the listener in `Created`; retrying is up to the caller.
    pub(crate) async fn bind(&self) -> Result<TcpListener, WireError> {
        if self.state() == ListenerState::Stopped {
            return Err(WireError::Stopped);
        }
        info!(addr = %self.addr, "creating local socket");
        self.set_state(ListenerState::Binding);
        match TcpListener::bind(self.addr).await {
            Ok(listener) => {
                self.set_state(ListenerState::Listening);
                Ok(listener)
            }
            Err(source) => {
                error!(addr = %self.addr, error = %source, "bind failed");
                self.set_state(ListenerState::Created);
                Err(WireError::Bind {
                    addr: self.addr,
                    source,
                })
            }
        }
    }

    /// Start accepting on `listener`. Each accepted socket gets its own
    /// handler task.
    pub(crate) fn spawn_accept_loop(&self, listener: TcpListener, ctx: ConnectionContext) {
        let shutdown_rx = self.shutdown_tx.subscribe();
        let span = ctx.span.clone();
        let task = tokio::spawn(accept_loop(listener, ctx, shutdown_rx).instrument(span));
        *self.accept_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    /// Whether the accept loop is still running.
    pub(crate) fn is_accepting(&self) -> bool {
        self.accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop accepting and drop the listening socket. Returns `false` if the
    /// listener was already stopped.
    pub(crate) async fn stop(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == ListenerState::Stopped {
                return false;
            }
            *state = ListenerState::Stopped;
        }
        self.shutdown_tx.send_replace(true);

        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
        true
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: ConnectionContext,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = closed(&mut shutdown_rx) => break,
            result = listener.accept() => result,
        };
        match accepted {
            Ok((stream, addr)) => {
                info!(%addr, "accepted connection, waiting for AUTH");
                let (reader, writer) = stream.into_split();
                let (handle, close_rx) = ConnectionHandle::new(writer, Some(addr));
                spawn_handler(&ctx, handle, close_rx, reader, None);
            }
            Err(e) => {
                // Open connections are unaffected; only new ones are refused.
                error!(error = %e, "accept failed, no longer accepting connections");
                break;
            }
        }
    }
    info!("accept loop finished");
}
