//! Registry of live connections.
//!
//! A connection is in the registry exactly while the hub considers it live.
//! Unregistering removes the entry before closing the connection, so no
//! broadcast snapshot taken afterwards can reach a connection being closed.

use crate::broadcast::within;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pointsync_transport::{Connection, ConnectionId};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The set of connections that receive broadcasts.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<dyn Connection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    ///
    /// Returns `false` if it was already registered.
    pub fn register(&self, connection: Arc<dyn Connection>) -> bool {
        match self.connections.entry(connection.id().clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                debug!(
                    connection = %connection.id(),
                    remote = ?connection.remote_addr(),
                    "Connection registered"
                );
                slot.insert(connection);
                true
            }
        }
    }

    /// Remove a connection and close it.
    ///
    /// Safe to call repeatedly: later calls leave the registry alone and the
    /// close of an already-closed connection is not an error. The close is
    /// abandoned once `close_timeout` elapses. Returns `true` if this call
    /// removed the entry.
    pub async fn unregister(
        &self,
        connection: &Arc<dyn Connection>,
        close_timeout: Option<Duration>,
    ) -> bool {
        let removed = self.connections.remove(connection.id()).is_some();

        if let Err(e) = within(close_timeout, connection.close()).await {
            debug!(connection = %connection.id(), error = %e, "Close failed");
        }

        if removed {
            debug!(
                connection = %connection.id(),
                remaining = self.connections.len(),
                "Connection unregistered"
            );
        }
        removed
    }

    /// Check whether a connection is registered.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Copy the current set of connections for iteration without holding
    /// any registry lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointsync_transport::memory;

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (conn, _inbound, _client) = memory::pair();
        let conn: Arc<dyn Connection> = conn;

        assert!(registry.register(Arc::clone(&conn)));
        assert!(!registry.register(Arc::clone(&conn)));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(conn.id()));
    }

    #[tokio::test]
    async fn test_unregister_twice() {
        let registry = ConnectionRegistry::new();
        let (conn, _inbound, mut client) = memory::pair();
        let conn: Arc<dyn Connection> = conn;
        registry.register(Arc::clone(&conn));

        assert!(registry.unregister(&conn, None).await);
        assert!(!registry.unregister(&conn, None).await);
        assert!(registry.is_empty());
        assert!(!conn.is_open());

        // Closed from the server side: the client sees the end of the stream
        assert!(client.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let registry = ConnectionRegistry::new();
        let (a, _ia, _ca) = memory::pair();
        let (b, _ib, _cb) = memory::pair();
        let a: Arc<dyn Connection> = a;
        registry.register(Arc::clone(&a));
        registry.register(b);

        let snapshot = registry.snapshot();
        registry.unregister(&a, None).await;

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.snapshot().len(), 1);
    }
}
