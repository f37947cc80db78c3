//! # pointsync-core
//!
//! The shared-state hub of the pointsync collaboration service.
//!
//! This crate provides the building blocks every session works through:
//!
//! - **PointStore** - Deduplicated set of points keyed by quantized coordinates
//! - **ConnectionRegistry** - Live connections that receive broadcasts
//! - **Broadcaster** - Encode-once fan-out with per-connection fault isolation
//! - **Hub** - Owns the store, the registry and the shared start time
//! - **Session** - Per-connection protocol state machine
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│     Hub     │────▶│ PointStore  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌──────────────────┐
//!                     │ Broadcaster │────▶│ConnectionRegistry│
//!                     └─────────────┘     └──────────────────┘
//! ```

pub mod broadcast;
pub mod hub;
pub mod registry;
pub mod session;
pub mod store;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use hub::{Hub, HubConfig, HubError, HubStats};
pub use registry::ConnectionRegistry;
pub use session::{Session, SessionError, SessionState};
pub use store::{PointKey, PointStore, Quantizer};
