//! WebSocket transport implementation.
//!
//! This module adapts an upgraded axum [`WebSocket`] to the transport traits.
//! Each WebSocket message carries one JSON document; text and binary frames
//! are decoded the same way.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pointsync_protocol::{codec, ClientMessage, ProtocolError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::traits::{Connection, ConnectionId, Inbound, TransportError};

/// Default maximum inbound message size (64 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Split an upgraded socket into its shared outbound handle and its inbound
/// message source.
#[must_use]
pub fn split(
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
) -> (Arc<WebSocketConnection>, WebSocketInbound) {
    let id = ConnectionId::generate();
    let is_open = Arc::new(AtomicBool::new(true));
    let (sink, stream) = socket.split();

    let connection = Arc::new(WebSocketConnection {
        id: id.clone(),
        sink: Mutex::new(sink),
        remote_addr,
        is_open: Arc::clone(&is_open),
    });

    let inbound = WebSocketInbound {
        id,
        stream,
        is_open,
        max_message_size,
    };

    (connection, inbound)
}

/// The outbound half of a WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    remote_addr: Option<SocketAddr>,
    is_open: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send_text(&self, payload: Arc<str>) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(payload.to_string()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            // The peer may have gone first; the close frame still goes out
            // if the socket is writable.
            debug!(connection = %self.id, "Closing connection already marked closed");
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(connection = %self.id, error = %e, "Socket already closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// The inbound half of a WebSocket connection.
pub struct WebSocketInbound {
    id: ConnectionId,
    stream: SplitStream<WebSocket>,
    is_open: Arc<AtomicBool>,
    max_message_size: usize,
}

impl WebSocketInbound {
    fn decode(&self, data: &[u8]) -> Result<Option<ClientMessage>, TransportError> {
        if data.len() > self.max_message_size {
            warn!(
                connection = %self.id,
                "Message too large: {} bytes (max: {})",
                data.len(),
                self.max_message_size
            );
            return Err(ProtocolError::MessageTooLarge(data.len()).into());
        }

        Ok(Some(codec::decode(data)?))
    }
}

#[async_trait]
impl Inbound for WebSocketInbound {
    async fn recv(&mut self) -> Result<Option<ClientMessage>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return self.decode(text.as_bytes()),
                Some(Ok(Message::Binary(data))) => return self.decode(&data),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Pongs are queued by the socket itself
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.is_open.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
            }
        }
    }
}
