//! # pointsync-transport
//!
//! Transport abstraction layer for the pointsync collaboration service.
//!
//! A live client is seen through two halves:
//!
//! - [`Connection`] - the shared outbound handle, held by the registry and
//!   written to by whichever session is broadcasting
//! - [`Inbound`] - the message source, owned by the client's own session
//!
//! Two transports implement them:
//!
//! - **WebSocket** - axum WebSocket upgrade, one JSON document per frame
//! - **Memory** - channel-backed, for tests and benchmarks
//!
//! ```rust,ignore
//! use pointsync_transport::Inbound;
//!
//! async fn drain(mut inbound: impl Inbound) {
//!     while let Ok(Some(message)) = inbound.recv().await {
//!         // Process message
//!     }
//! }
//! ```

pub mod memory;
pub mod origin;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryClient, MemoryConnection, MemoryInbound};
pub use origin::{AllowAnyOrigin, AllowListedOrigins, OriginPolicy};
pub use traits::{Connection, ConnectionId, Inbound, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketInbound};
