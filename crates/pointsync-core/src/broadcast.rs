//! Fan-out of hub events to every registered connection.
//!
//! An event is encoded once and the same payload is written to each
//! connection in a registry snapshot, one after another. A connection whose
//! write fails or exceeds the write deadline is unregistered and closed
//! under the same deadline; the remaining connections still receive the
//! event.

use crate::registry::ConnectionRegistry;
use pointsync_protocol::{codec, ProtocolError, ServerMessage};
use pointsync_transport::{Connection, TransportError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, trace, warn};

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections in the snapshot the broadcast iterated.
    pub recipients: usize,
    /// Writes that completed.
    pub delivered: usize,
    /// Writes that failed; each of these connections was dropped.
    pub failed: usize,
}

/// Run a transport operation under an optional deadline.
pub(crate) async fn within<F>(limit: Option<Duration>, operation: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| TransportError::Timeout)?,
        None => operation.await,
    }
}

/// Writes events to registered connections.
#[derive(Debug, Clone, Default)]
pub struct Broadcaster {
    write_timeout: Option<Duration>,
}

impl Broadcaster {
    /// Create a broadcaster. With `None`, writes may block indefinitely.
    #[must_use]
    pub fn new(write_timeout: Option<Duration>) -> Self {
        Self { write_timeout }
    }

    /// Per-connection write deadline.
    #[must_use]
    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    /// Encode an event and write it to every registered connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be encoded. Nothing is written
    /// to any connection in that case.
    pub async fn broadcast(
        &self,
        registry: &ConnectionRegistry,
        event: &ServerMessage,
    ) -> Result<BroadcastReport, ProtocolError> {
        let payload: Arc<str> = match codec::encode(event) {
            Ok(payload) => Arc::from(payload),
            Err(e) => {
                error!(kind = event.kind(), error = %e, "Dropping broadcast, encode failed");
                return Err(e);
            }
        };

        let report = self.fan_out(registry, payload).await;
        trace!(
            kind = event.kind(),
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast complete"
        );
        Ok(report)
    }

    /// Write an already-encoded payload to every registered connection.
    pub async fn fan_out(&self, registry: &ConnectionRegistry, payload: Arc<str>) -> BroadcastReport {
        let targets = registry.snapshot();
        let mut report = BroadcastReport {
            recipients: targets.len(),
            ..BroadcastReport::default()
        };

        for connection in &targets {
            match within(self.write_timeout, connection.send_text(Arc::clone(&payload))).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        connection = %connection.id(),
                        remote = ?connection.remote_addr(),
                        error = %e,
                        "Write failed, dropping connection"
                    );
                    registry.unregister(connection, self.write_timeout).await;
                    report.failed += 1;
                }
            }
        }

        report
    }
}
