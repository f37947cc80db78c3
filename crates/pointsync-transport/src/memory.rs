//! In-memory transport.
//!
//! A channel-backed connection with a [`MemoryClient`] standing in for the
//! remote peer. Used to drive sessions in tests and benchmarks without
//! sockets.

use async_trait::async_trait;
use pointsync_protocol::{codec, ClientMessage, ProtocolError, ServerMessage};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::traits::{Connection, ConnectionId, Inbound, TransportError};

type Request = Result<ClientMessage, TransportError>;

/// Create a connected memory transport.
///
/// Returns the server-side outbound handle, the server-side inbound source,
/// and the client handle.
#[must_use]
pub fn pair() -> (Arc<MemoryConnection>, MemoryInbound, MemoryClient) {
    let id = ConnectionId::generate();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let is_open = Arc::new(AtomicBool::new(true));

    let connection = Arc::new(MemoryConnection {
        id: id.clone(),
        outbound: Mutex::new(Some(event_tx)),
        is_open: Arc::clone(&is_open),
        fail_writes: AtomicBool::new(false),
        writes: AtomicUsize::new(0),
    });

    let inbound = MemoryInbound {
        requests: request_rx,
        is_open,
    };

    let client = MemoryClient {
        id,
        requests: request_tx,
        events: event_rx,
    };

    (connection, inbound, client)
}

/// Server-side outbound handle of a memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    outbound: Mutex<Option<mpsc::UnboundedSender<Arc<str>>>>,
    is_open: Arc<AtomicBool>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryConnection {
    /// Make every subsequent write fail, as a broken socket would.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Number of write attempts made on this connection, including failed ones.
    #[must_use]
    pub fn write_attempts(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send_text(&self, payload: Arc<str>) -> Result<(), TransportError> {
        self.writes.fetch_add(1, Ordering::SeqCst);

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("write failure injected".into()));
        }

        let outbound = self.outbound.lock().await;
        match outbound.as_ref() {
            Some(tx) => tx
                .send(payload)
                .map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.is_open.store(false, Ordering::SeqCst);
        if self.outbound.lock().await.take().is_some() {
            debug!(connection = %self.id, "Memory connection closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

/// Server-side inbound source of a memory connection.
pub struct MemoryInbound {
    requests: mpsc::UnboundedReceiver<Request>,
    is_open: Arc<AtomicBool>,
}

#[async_trait]
impl Inbound for MemoryInbound {
    async fn recv(&mut self) -> Result<Option<ClientMessage>, TransportError> {
        match self.requests.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => {
                self.is_open.store(false, Ordering::SeqCst);
                Err(e)
            }
            None => {
                self.is_open.store(false, Ordering::SeqCst);
                Ok(None)
            }
        }
    }
}

/// The remote peer of a memory connection.
///
/// Dropping the client closes both directions: the session sees a clean
/// close and further writes to the connection fail.
pub struct MemoryClient {
    id: ConnectionId,
    requests: mpsc::UnboundedSender<Request>,
    events: mpsc::UnboundedReceiver<Arc<str>>,
}

impl MemoryClient {
    /// The ID of the server-side connection this client talks to.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Send a request to the server.
    ///
    /// Returns `false` if the server side has gone away.
    pub fn send(&self, message: ClientMessage) -> bool {
        self.requests.send(Ok(message)).is_ok()
    }

    /// Send a raw payload, decoded the way a network transport would.
    ///
    /// A payload that does not decode reaches the session as a read failure.
    pub fn send_raw(&self, payload: &str) -> bool {
        let request = codec::decode(payload.as_bytes()).map_err(TransportError::from);
        self.requests.send(request).is_ok()
    }

    /// Deliver a transport error to the session's next read.
    pub fn send_error(&self, error: TransportError) -> bool {
        self.requests.send(Err(error)).is_ok()
    }

    /// Wait for the next server message.
    ///
    /// Returns `None` once the server has closed the connection and every
    /// queued message has been read.
    pub async fn recv(&mut self) -> Option<Result<ServerMessage, ProtocolError>> {
        let payload = self.events.recv().await?;
        Some(codec::decode(payload.as_bytes()))
    }

    /// Take the next server message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Result<ServerMessage, ProtocolError>> {
        let payload = self.events.try_recv().ok()?;
        Some(codec::decode(payload.as_bytes()))
    }
}
