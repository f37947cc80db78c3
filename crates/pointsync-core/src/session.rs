//! Per-connection protocol state machine.
//!
//! ```text
//! Connecting ──▶ Upgraded ──▶ Active ──▶ Closed
//!                   │                      ▲
//!                   └──── init failed ─────┘
//! ```
//!
//! `Connecting` is the transport handshake, which completes (or fails) before
//! a `Session` exists; a failed handshake never reaches the registry.

use crate::broadcast::{within, BroadcastReport};
use crate::hub::Hub;
use pointsync_protocol::{codec, ClientMessage, Point, ProtocolError, ServerMessage};
use pointsync_transport::{Connection, ConnectionId, Inbound, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport handshake in progress.
    Connecting,
    /// Handshake complete, not yet registered.
    Upgraded,
    /// Registered and initialized; processing client messages.
    Active,
    /// Unregistered and closed. Terminal.
    Closed,
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation not valid in the current state.
    #[error("Session is {actual:?}, expected {expected:?}")]
    InvalidState {
        actual: SessionState,
        expected: SessionState,
    },

    /// The init message could not be encoded.
    #[error("Failed to encode init message: {0}")]
    Encode(#[from] ProtocolError),

    /// The init message could not be delivered.
    #[error("Failed to send init message: {0}")]
    Init(#[source] TransportError),
}

/// A single client's session with the hub.
pub struct Session {
    hub: Arc<Hub>,
    connection: Arc<dyn Connection>,
    state: SessionState,
}

impl Session {
    /// Create a session for a connection whose handshake has completed.
    #[must_use]
    pub fn new(hub: Arc<Hub>, connection: Arc<dyn Connection>) -> Self {
        Self {
            hub,
            connection,
            state: SessionState::Upgraded,
        }
    }

    /// The connection's ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        self.connection.id()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Register with the hub and send the `init` message.
    ///
    /// If the init message cannot be delivered within the hub's write
    /// deadline the session is closed, since the client never received
    /// usable state.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not `Upgraded` or init failed.
    pub async fn activate(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Upgraded {
            return Err(SessionError::InvalidState {
                actual: self.state,
                expected: SessionState::Upgraded,
            });
        }

        self.hub.connections().register(Arc::clone(&self.connection));

        if let Err(e) = self.send_init().await {
            self.close().await;
            return Err(e);
        }

        self.state = SessionState::Active;
        debug!(connection = %self.id(), "Session active");
        Ok(())
    }

    async fn send_init(&self) -> Result<(), SessionError> {
        let payload = codec::encode(&self.hub.init_message())?;
        within(
            self.hub.write_timeout(),
            self.connection.send_text(Arc::from(payload)),
        )
        .await
        .map_err(SessionError::Init)
    }

    /// Apply one client message.
    ///
    /// Returns the broadcast report when the message changed the store.
    pub async fn handle(&mut self, message: ClientMessage) -> Option<BroadcastReport> {
        if self.state != SessionState::Active {
            warn!(connection = %self.id(), state = ?self.state, "Message on inactive session");
            return None;
        }

        match message {
            ClientMessage::Add { point: Some(point) } => self.add(point).await,
            ClientMessage::Remove { point: Some(point) } => self.remove(point).await,
            ClientMessage::Add { point: None } | ClientMessage::Remove { point: None } => {
                warn!(connection = %self.id(), kind = message.kind(), "Message without point ignored");
                None
            }
            ClientMessage::Unknown => {
                warn!(connection = %self.id(), "Unknown message type ignored");
                None
            }
        }
    }

    async fn add(&self, point: Point) -> Option<BroadcastReport> {
        if !self.hub.points().add(point) {
            debug!(connection = %self.id(), point = %point, "Duplicate add");
            return None;
        }
        self.hub.broadcast(&ServerMessage::add(point)).await.ok()
    }

    async fn remove(&self, point: Point) -> Option<BroadcastReport> {
        if !self.hub.points().remove(&point) {
            debug!(connection = %self.id(), point = %point, "Remove of absent point");
            return None;
        }
        self.hub.broadcast(&ServerMessage::remove(point)).await.ok()
    }

    /// Unregister and close. Idempotent.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.hub
            .connections()
            .unregister(&self.connection, self.hub.write_timeout())
            .await;
        self.state = SessionState::Closed;
        debug!(connection = %self.id(), "Session closed");
    }

    /// Drive the session to completion.
    ///
    /// Activates, then processes client messages in receipt order until the
    /// client disconnects or a read fails, then closes.
    pub async fn run<I: Inbound>(mut self, mut inbound: I) -> SessionState {
        if let Err(e) = self.activate().await {
            warn!(connection = %self.id(), error = %e, "Session failed to start");
            return self.state;
        }

        loop {
            match inbound.recv().await {
                Ok(Some(message)) => {
                    self.handle(message).await;
                }
                Ok(None) => {
                    debug!(connection = %self.id(), "Client closed connection");
                    break;
                }
                Err(e) => {
                    warn!(connection = %self.id(), error = %e, "Read failed, closing session");
                    break;
                }
            }
        }

        self.close().await;
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use async_trait::async_trait;
    use pointsync_protocol::codec::MAX_MESSAGE_SIZE;
    use pointsync_transport::memory::{self, MemoryClient};
    use std::time::Duration;
    use tokio::task::JoinHandle;

    /// A connection that never accepts a write.
    struct UnreadConnection {
        id: ConnectionId,
    }

    #[async_trait]
    impl Connection for UnreadConnection {
        fn id(&self) -> &ConnectionId {
            &self.id
        }

        async fn send_text(&self, _payload: Arc<str>) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    fn connect(hub: &Arc<Hub>) -> (MemoryClient, JoinHandle<SessionState>) {
        let (conn, inbound, client) = memory::pair();
        let session = Session::new(Arc::clone(hub), conn);
        (client, tokio::spawn(session.run(inbound)))
    }

    async fn next(client: &mut MemoryClient) -> ServerMessage {
        client.recv().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let hub = Arc::new(Hub::new());
        let p = Point::new(1.0, 2.0, 3.0);

        let (mut a, _ta) = connect(&hub);
        assert_eq!(next(&mut a).await, ServerMessage::init(vec![], hub.start_time()));

        a.send(ClientMessage::add(p));
        assert_eq!(next(&mut a).await, ServerMessage::add(p));
        assert!(hub.points().contains(&p));

        let (mut b, _tb) = connect(&hub);
        assert_eq!(next(&mut b).await, ServerMessage::init(vec![p], hub.start_time()));

        a.send(ClientMessage::remove(p));
        assert_eq!(next(&mut a).await, ServerMessage::remove(p));
        assert_eq!(next(&mut b).await, ServerMessage::remove(p));
        assert!(hub.points().is_empty());
    }

    #[tokio::test]
    async fn test_join_sees_current_snapshot() {
        let hub = Arc::new(Hub::new());
        let p1 = Point::new(1.0, 0.0, 0.0);
        let p2 = Point::new(2.0, 0.0, 0.0);

        let (mut a, _ta) = connect(&hub);
        let first_init = next(&mut a).await;
        a.send(ClientMessage::add(p1));
        a.send(ClientMessage::add(p2));
        a.send(ClientMessage::remove(p1));
        assert_eq!(next(&mut a).await, ServerMessage::add(p1));
        assert_eq!(next(&mut a).await, ServerMessage::add(p2));
        assert_eq!(next(&mut a).await, ServerMessage::remove(p1));

        let (mut b, _tb) = connect(&hub);
        match (first_init, next(&mut b).await) {
            (
                ServerMessage::Init { start_time: t1, .. },
                ServerMessage::Init { points, start_time: t2 },
            ) => {
                assert_eq!(points, vec![p2]);
                assert_eq!(t1, t2);
            }
            other => panic!("Expected two init messages, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_add_is_not_broadcast() {
        let hub = Arc::new(Hub::new());
        let p = Point::new(1.0, 2.0, 3.0);
        let q = Point::new(7.0, 8.0, 9.0);

        let (mut a, _ta) = connect(&hub);
        next(&mut a).await;

        a.send(ClientMessage::add(p));
        a.send(ClientMessage::add(Point::new(1.000_000_2, 2.0, 3.0)));
        a.send(ClientMessage::add(q));

        // Messages are handled in order, so a second add event would arrive before q's
        assert_eq!(next(&mut a).await, ServerMessage::add(p));
        assert_eq!(next(&mut a).await, ServerMessage::add(q));
        assert_eq!(hub.stats().points, 2);
    }

    #[tokio::test]
    async fn test_remove_absent_is_not_broadcast() {
        let hub = Arc::new(Hub::new());
        let p = Point::new(1.0, 2.0, 3.0);

        let (mut a, _ta) = connect(&hub);
        next(&mut a).await;

        a.send(ClientMessage::remove(p));
        a.send(ClientMessage::add(p));
        assert_eq!(next(&mut a).await, ServerMessage::add(p));
    }

    #[tokio::test]
    async fn test_unknown_and_pointless_messages_are_ignored() {
        let hub = Arc::new(Hub::new());
        let p = Point::new(0.5, 0.5, 0.5);

        let (mut a, _ta) = connect(&hub);
        next(&mut a).await;

        a.send(ClientMessage::Unknown);
        a.send(ClientMessage::Add { point: None });
        a.send_raw(r#"{"type":"move","point":{"x":1,"y":1,"z":1}}"#);
        a.send(ClientMessage::add(p));

        assert_eq!(next(&mut a).await, ServerMessage::add(p));
        assert_eq!(hub.stats().connections, 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_closes_session() {
        let hub = Arc::new(Hub::new());
        let (mut a, task) = connect(&hub);
        next(&mut a).await;

        a.send_raw("{\"type\": \"add\", \"point\":");

        assert_eq!(task.await.unwrap(), SessionState::Closed);
        assert!(a.recv().await.is_none());
        assert!(hub.connections().is_empty());
    }

    #[tokio::test]
    async fn test_client_disconnect_closes_session() {
        let hub = Arc::new(Hub::new());
        let (mut a, task) = connect(&hub);
        let (mut b, _tb) = connect(&hub);
        next(&mut a).await;
        next(&mut b).await;
        assert_eq!(hub.stats().connections, 2);

        drop(a);
        assert_eq!(task.await.unwrap(), SessionState::Closed);
        assert_eq!(hub.stats().connections, 1);

        // The other session is unaffected
        let p = Point::new(3.0, 2.0, 1.0);
        b.send(ClientMessage::add(p));
        assert_eq!(next(&mut b).await, ServerMessage::add(p));
    }

    #[tokio::test]
    async fn test_transport_error_closes_session() {
        let hub = Arc::new(Hub::new());
        let (mut a, task) = connect(&hub);
        next(&mut a).await;

        a.send_error(TransportError::ReceiveFailed("connection reset".into()));

        assert_eq!(task.await.unwrap(), SessionState::Closed);
        assert!(hub.connections().is_empty());
    }

    #[tokio::test]
    async fn test_failed_init_closes_session() {
        let hub = Arc::new(Hub::new());
        let (conn, inbound, _client) = memory::pair();
        conn.fail_writes();

        let state = Session::new(Arc::clone(&hub), conn.clone()).run(inbound).await;

        assert_eq!(state, SessionState::Closed);
        assert!(hub.connections().is_empty());
        assert!(!conn.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_init_hits_deadline() {
        let hub = Arc::new(
            Hub::with_config(HubConfig {
                write_timeout: Some(Duration::from_millis(500)),
                ..HubConfig::default()
            })
            .unwrap(),
        );
        let (_conn, inbound, _client) = memory::pair();
        let stalled = Arc::new(UnreadConnection {
            id: ConnectionId::new("unread"),
        });

        let state = tokio::time::timeout(
            Duration::from_secs(3600),
            Session::new(Arc::clone(&hub), stalled).run(inbound),
        )
        .await
        .expect("session stuck sending init");

        assert_eq!(state, SessionState::Closed);
        assert!(hub.connections().is_empty());
    }

    #[tokio::test]
    async fn test_join_receives_large_snapshot() {
        let hub = Arc::new(Hub::new());
        for i in 0..400_000 {
            hub.points()
                .add(Point::new(f64::from(i) + 0.123_456, -f64::from(i) * 0.5, 1_234_567.891));
        }
        assert!(codec::encode(&hub.init_message()).unwrap().len() > MAX_MESSAGE_SIZE);

        let (mut a, _ta) = connect(&hub);
        match next(&mut a).await {
            ServerMessage::Init { points, .. } => assert_eq!(points.len(), 400_000),
            other => panic!("Expected init, got {:?}", other),
        }
        assert_eq!(hub.stats().connections, 1);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let hub = Arc::new(Hub::new());
        let (conn, _inbound, mut client) = memory::pair();
        let mut session = Session::new(Arc::clone(&hub), conn);
        assert_eq!(session.state(), SessionState::Upgraded);

        session.activate().await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert!(hub.connections().contains(session.id()));
        assert!(matches!(
            session.activate().await,
            Err(SessionError::InvalidState { .. })
        ));

        let report = session
            .handle(ClientMessage::add(Point::new(1.0, 1.0, 1.0)))
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);

        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session
            .handle(ClientMessage::add(Point::new(2.0, 2.0, 2.0)))
            .await
            .is_none());
        assert_eq!(hub.stats().points, 1);

        assert!(matches!(next(&mut client).await, ServerMessage::Init { .. }));
        assert_eq!(next(&mut client).await, ServerMessage::add(Point::new(1.0, 1.0, 1.0)));
        assert!(client.recv().await.is_none());
    }
}
