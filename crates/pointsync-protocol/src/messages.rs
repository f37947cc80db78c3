//! Message types for the pointsync protocol.
//!
//! Client and server share one JSON shape, tagged by `type`, but the set of
//! kinds each side may send differs, so each direction gets its own enum.

use crate::point::Point;
use serde::{Deserialize, Serialize};

/// A message sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Ask the server to add a point.
    Add {
        /// The point to add. A request without one is ignored.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        point: Option<Point>,
    },

    /// Ask the server to remove a point.
    Remove {
        /// The point to remove. A request without one is ignored.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        point: Option<Point>,
    },

    /// Any kind this server does not understand.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Create an add request.
    #[must_use]
    pub fn add(point: Point) -> Self {
        ClientMessage::Add { point: Some(point) }
    }

    /// Create a remove request.
    #[must_use]
    pub fn remove(point: Point) -> Self {
        ClientMessage::Remove { point: Some(point) }
    }

    /// The wire name of this message kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Add { .. } => "add",
            ClientMessage::Remove { .. } => "remove",
            ClientMessage::Unknown => "unknown",
        }
    }
}

/// A message sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Full state, sent once when a connection becomes active.
    Init {
        /// Every point currently in the store, in no particular order.
        points: Vec<Point>,
        /// Hub start time in epoch milliseconds, identical for every client.
        #[serde(rename = "startTime")]
        start_time: i64,
    },

    /// A point was added to the store.
    Add {
        /// The added point.
        point: Point,
    },

    /// A point was removed from the store.
    Remove {
        /// The removed point.
        point: Point,
    },
}

impl ServerMessage {
    /// Create an init message.
    #[must_use]
    pub fn init(points: Vec<Point>, start_time: i64) -> Self {
        ServerMessage::Init { points, start_time }
    }

    /// Create an add event.
    #[must_use]
    pub fn add(point: Point) -> Self {
        ServerMessage::Add { point }
    }

    /// Create a remove event.
    #[must_use]
    pub fn remove(point: Point) -> Self {
        ServerMessage::Remove { point }
    }

    /// The wire name of this message kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Init { .. } => "init",
            ServerMessage::Add { .. } => "add",
            ServerMessage::Remove { .. } => "remove",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_add_decodes() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "add", "point": {"x": 1, "y": 2, "z": 3}}))
                .unwrap();
        assert_eq!(msg, ClientMessage::add(Point::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_client_unknown_kind_is_not_an_error() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "move", "point": {"x": 1, "y": 2, "z": 3}}))
                .unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
        assert_eq!(msg.kind(), "unknown");
    }

    #[test]
    fn test_client_init_is_unknown() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "init", "points": [], "startTime": 5})).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
    }

    #[test]
    fn test_client_add_without_point() {
        let msg: ClientMessage = serde_json::from_value(json!({"type": "add"})).unwrap();
        assert_eq!(msg, ClientMessage::Add { point: None });
    }

    #[test]
    fn test_client_missing_type_is_an_error() {
        let result: Result<ClientMessage, _> =
            serde_json::from_value(json!({"point": {"x": 1, "y": 2, "z": 3}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_server_init_shape() {
        let msg = ServerMessage::init(vec![Point::new(1.0, 2.0, 3.0)], 1_700_000_000_000);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "init",
                "points": [{"x": 1.0, "y": 2.0, "z": 3.0}],
                "startTime": 1_700_000_000_000_i64
            })
        );
    }

    #[test]
    fn test_server_empty_init_keeps_points() {
        let value = serde_json::to_value(ServerMessage::init(Vec::new(), 7)).unwrap();
        assert_eq!(value["points"], json!([]));
        assert_eq!(value["startTime"], json!(7));
    }

    #[test]
    fn test_server_remove_shape() {
        let msg = ServerMessage::remove(Point::new(0.5, 0.0, -1.0));
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "remove", "point": {"x": 0.5, "y": 0.0, "z": -1.0}})
        );
        assert_eq!(msg.kind(), "remove");
    }
}
