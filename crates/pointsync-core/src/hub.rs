//! The shared hub.
//!
//! One `Hub` is created at startup and shared (behind an `Arc`) by every
//! session. It owns the point store, the connection registry and the start
//! timestamp handed to each client in its `init` message.

use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::registry::ConnectionRegistry;
use crate::store::{PointStore, Quantizer, DEFAULT_PRECISION, MAX_PRECISION};
use pointsync_protocol::{ProtocolError, ServerMessage};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::info;

/// Default per-connection write deadline for broadcasts.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// Key precision out of range.
    #[error("Invalid key precision {0} (max {MAX_PRECISION})")]
    InvalidPrecision(u32),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Fractional digits kept when deciding point identity.
    pub precision: u32,
    /// Deadline for a single broadcast write. `None` disables it.
    pub write_timeout: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Points in the store.
    pub points: usize,
    /// Registered connections.
    pub connections: usize,
}

/// The single shared-state object.
pub struct Hub {
    points: PointStore,
    connections: ConnectionRegistry,
    broadcaster: Broadcaster,
    start_time: i64,
}

impl Hub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(Quantizer::default(), HubConfig::default().write_timeout)
    }

    /// Create a hub with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured precision is out of range.
    pub fn with_config(config: HubConfig) -> Result<Self, HubError> {
        info!("Creating hub with config: {:?}", config);
        let quantizer = Quantizer::new(config.precision)?;
        Ok(Self::from_parts(quantizer, config.write_timeout))
    }

    fn from_parts(quantizer: Quantizer, write_timeout: Option<Duration>) -> Self {
        let start_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        Self {
            points: PointStore::with_quantizer(quantizer),
            connections: ConnectionRegistry::new(),
            broadcaster: Broadcaster::new(write_timeout),
            start_time,
        }
    }

    /// Hub start time in epoch milliseconds, fixed at construction.
    #[must_use]
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// The point store.
    #[must_use]
    pub fn points(&self) -> &PointStore {
        &self.points
    }

    /// The connection registry.
    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Deadline for a single write to one connection.
    #[must_use]
    pub fn write_timeout(&self) -> Option<Duration> {
        self.broadcaster.write_timeout()
    }

    /// Build the `init` message for a newly active connection.
    #[must_use]
    pub fn init_message(&self) -> ServerMessage {
        ServerMessage::init(self.points.snapshot(), self.start_time)
    }

    /// Broadcast an event to every registered connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be encoded; nothing is sent.
    pub async fn broadcast(&self, event: &ServerMessage) -> Result<BroadcastReport, ProtocolError> {
        self.broadcaster.broadcast(&self.connections, event).await
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            points: self.points.len(),
            connections: self.connections.len(),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointsync_protocol::Point;
    use pointsync_transport::memory;

    #[test]
    fn test_hub_starts_empty() {
        let hub = Hub::new();
        assert_eq!(
            hub.stats(),
            HubStats {
                points: 0,
                connections: 0
            }
        );
        assert!(hub.start_time() > 0);
    }

    #[test]
    fn test_init_message_reflects_store() {
        let hub = Hub::new();
        hub.points().add(Point::new(1.0, 2.0, 3.0));
        hub.points().add(Point::new(4.0, 5.0, 6.0));
        hub.points().remove(&Point::new(1.0, 2.0, 3.0));

        match hub.init_message() {
            ServerMessage::Init { points, start_time } => {
                assert_eq!(points, vec![Point::new(4.0, 5.0, 6.0)]);
                assert_eq!(start_time, hub.start_time());
            }
            other => panic!("Expected init, got {:?}", other),
        }
    }

    #[test]
    fn test_with_config() {
        let hub = Hub::with_config(HubConfig {
            precision: 3,
            write_timeout: None,
        })
        .unwrap();
        assert_eq!(hub.points().quantizer().precision(), 3);
        assert_eq!(hub.write_timeout(), None);
        assert_eq!(Hub::new().write_timeout(), Some(DEFAULT_WRITE_TIMEOUT));

        assert!(matches!(
            Hub::with_config(HubConfig {
                precision: 40,
                write_timeout: None,
            }),
            Err(HubError::InvalidPrecision(40))
        ));
    }

    #[tokio::test]
    async fn test_hub_broadcast() {
        let hub = Hub::new();
        let (conn, _inbound, mut client) = memory::pair();
        hub.connections().register(conn);

        let event = ServerMessage::add(Point::new(1.0, 1.0, 1.0));
        let report = hub.broadcast(&event).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(client.recv().await.unwrap().unwrap(), event);
        assert_eq!(hub.stats().connections, 1);
    }
}
