//! Transport abstraction traits for pointsync.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing the hub to be transport-agnostic.

use async_trait::async_trait;
use pointsync_protocol::ClientMessage;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Sequence shared by all generated IDs so two connections accepted in the
/// same instant still get distinct IDs.
static NEXT_CONNECTION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = NEXT_CONNECTION_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{}", timestamp, seq))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation did not complete within its deadline.
    #[error("Timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Payload could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] pointsync_protocol::ProtocolError),
}

/// The outbound half of an active connection.
///
/// Handles are shared: the registry keeps one, and any session may write to
/// it while broadcasting. Implementations serialize concurrent writes.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Send one pre-encoded text payload.
    async fn send_text(&self, payload: Arc<str>) -> Result<(), TransportError>;

    /// Close the connection.
    ///
    /// Closing a connection that is already closed succeeds.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// The inbound half of an active connection.
#[async_trait]
pub trait Inbound: Send {
    /// Receive the next client message.
    ///
    /// Returns `Ok(None)` if the client closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<ClientMessage>, TransportError>;
}
