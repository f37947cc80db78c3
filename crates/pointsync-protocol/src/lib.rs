//! # pointsync-protocol
//!
//! Wire protocol definitions for the pointsync collaboration service.
//!
//! Every message on the wire is a single JSON document tagged by its `type`
//! field:
//!
//! - `init` - Server sends the full point set and the shared start time
//! - `add` / `remove` - Client requests a mutation; server broadcasts it
//!
//! ## Example
//!
//! ```rust
//! use pointsync_protocol::{codec, ClientMessage, Point, ServerMessage};
//!
//! let event = ServerMessage::add(Point::new(1.0, 2.0, 3.0));
//! let json = codec::encode(&event).unwrap();
//! assert_eq!(json, r#"{"type":"add","point":{"x":1.0,"y":2.0,"z":3.0}}"#);
//!
//! let request: ClientMessage = codec::decode(br#"{"type":"remove","point":{"x":1,"y":2,"z":3}}"#).unwrap();
//! assert_eq!(request, ClientMessage::remove(Point::new(1.0, 2.0, 3.0)));
//! ```

pub mod codec;
pub mod messages;
pub mod point;

pub use codec::{decode, encode, ProtocolError};
pub use messages::{ClientMessage, ServerMessage};
pub use point::Point;
