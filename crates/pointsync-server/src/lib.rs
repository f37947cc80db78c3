//! # pointsync-server
//!
//! HTTP/WebSocket front end for the pointsync hub: configuration,
//! connection admission, static assets and metrics.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{router, run_server, serve, AppState};
