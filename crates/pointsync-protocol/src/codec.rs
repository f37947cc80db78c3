//! JSON codec for pointsync messages.
//!
//! Each transport message carries exactly one JSON document, so there is no
//! framing layer here: encoding produces the full text payload and decoding
//! consumes one complete payload.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum size of an inbound payload (16 MiB).
///
/// Only decoding is bounded: an `init` carries the whole point set and must
/// reach the client however large the store has grown.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a message to its JSON text payload.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<M: Serialize>(message: &M) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a message from one complete JSON payload.
///
/// # Errors
///
/// Returns an error if the payload is too large or is not a valid message.
pub fn decode<M: DeserializeOwned>(data: &[u8]) -> Result<M, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(data.len()));
    }

    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientMessage, Point, ServerMessage};

    #[test]
    fn test_encode_add_event() {
        let encoded = encode(&ServerMessage::add(Point::new(1.0, 2.0, 3.0))).unwrap();
        assert_eq!(encoded, r#"{"type":"add","point":{"x":1.0,"y":2.0,"z":3.0}}"#);
    }

    #[test]
    fn test_decode_client_request() {
        let decoded: ClientMessage =
            decode(br#"{"type":"add","point":{"x":0.25,"y":-4,"z":9.5}}"#).unwrap();
        assert_eq!(decoded, ClientMessage::add(Point::new(0.25, -4.0, 9.5)));
    }

    #[test]
    fn test_decode_malformed() {
        match decode::<ClientMessage>(b"{\"type\":\"add\"") {
            Err(ProtocolError::Json(_)) => {}
            other => panic!("Expected Json error, got {:?}", other),
        }

        match decode::<ClientMessage>(b"not json at all") {
            Err(ProtocolError::Json(_)) => {}
            other => panic!("Expected Json error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_too_large() {
        let oversized = vec![b' '; MAX_MESSAGE_SIZE + 1];
        match decode::<ClientMessage>(&oversized) {
            Err(ProtocolError::MessageTooLarge(n)) => assert_eq!(n, MAX_MESSAGE_SIZE + 1),
            other => panic!("Expected MessageTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_init_reaches_client_intact() {
        let points = vec![Point::new(1.0, 2.0, 3.0), Point::new(-0.5, 0.0, 8.25)];
        let encoded = encode(&ServerMessage::init(points.clone(), 42)).unwrap();

        let decoded: ServerMessage = decode(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, ServerMessage::init(points, 42));
    }

    #[test]
    fn test_encode_has_no_size_cap() {
        let points: Vec<Point> = (0..400_000)
            .map(|i| Point::new(f64::from(i) + 0.123_456, -f64::from(i) * 0.5, 1_234_567.891))
            .collect();

        let encoded = encode(&ServerMessage::init(points, 42)).unwrap();
        assert!(encoded.len() > MAX_MESSAGE_SIZE);
    }
}
