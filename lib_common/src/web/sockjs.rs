//! # SockJS Envelope
//!
//! The browser UI reaches the relay through a SockJS client, which wraps
//! every WebSocket text message in a one-letter envelope:
//!
//! | Frame | Meaning |
//! |-------|---------|
//! | `o` | session open |
//! | `h` | heartbeat |
//! | `a["..",".."]` | one or more messages |
//! | `c[3000,"Go away!"]` | session closed |
//!
//! Client-to-server messages are a JSON array of strings (or a single JSON
//! string). Only the WebSocket transport is served.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::AppState;
use crate::messaging::ProtocolError;

/// Sent once right after the WebSocket opens.
pub const OPEN_FRAME: &str = "o";
/// Keeps idle connections (and proxies in between) alive.
pub const HEARTBEAT_FRAME: &str = "h";

/// Close code and reason used when the relay ends a session.
pub const GO_AWAY: (u16, &str) = (3000, "Go away!");

/// Wraps queued messages into one `a[...]` frame.
pub fn encode_messages(messages: &[String]) -> String {
    format!("a{}", Value::from(messages.to_vec()))
}

/// A `c[code,"reason"]` frame.
pub fn encode_close(code: u16, reason: &str) -> String {
    format!("c{}", json!([code, reason]))
}

/// Unwraps one client message into the STOMP payloads it carries.
pub fn decode_messages(text: &str) -> Result<Vec<String>, ProtocolError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::BadEnvelope(e.to_string()))?;
    match value {
        Value::String(single) => Ok(vec![single]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(ProtocolError::BadEnvelope(format!(
                    "expected a string element, got {}",
                    other
                ))),
            })
            .collect(),
        other => Err(ProtocolError::BadEnvelope(format!(
            "expected a string array, got {}",
            other
        ))),
    }
}

/// `GET <prefix>/info`, queried by SockJS clients before connecting.
pub async fn info(State(_state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "websocket": true,
        "origins": ["*:*"],
        "cookie_needed": false,
        "entropy": rand::random::<u32>(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_wrapped_as_json_string_array() {
        let frames = vec!["CONNECTED\nsession:x\n\n\0".to_string()];
        assert_eq!(
            encode_messages(&frames),
            r#"a["CONNECTED\nsession:x\n\n\u0000"]"#
        );
    }

    #[test]
    fn close_frame_format() {
        assert_eq!(encode_close(GO_AWAY.0, GO_AWAY.1), r#"c[3000,"Go away!"]"#);
    }

    #[test]
    fn decode_accepts_arrays_and_single_strings() {
        assert_eq!(
            decode_messages(r#"["CONNECT\n\n\u0000","SUBSCRIBE\n\n\u0000"]"#).unwrap(),
            vec!["CONNECT\n\n\0".to_string(), "SUBSCRIBE\n\n\0".to_string()]
        );
        assert_eq!(decode_messages(r#""x""#).unwrap(), vec!["x".to_string()]);
        assert!(decode_messages("").unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_other_shapes() {
        assert!(matches!(decode_messages("[1]"), Err(ProtocolError::BadEnvelope(_))));
        assert!(matches!(decode_messages("{}"), Err(ProtocolError::BadEnvelope(_))));
        assert!(matches!(decode_messages("CONNECT"), Err(ProtocolError::BadEnvelope(_))));
    }
}
