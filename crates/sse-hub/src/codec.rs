//! Wire encoding for SSE messages
//!
//! Every message is a single `data:` line followed by a blank line. No `event:`,
//! `id:` or `retry:` fields are emitted; consumers tell messages apart by the
//! fields inside the JSON payload.

use serde::Serialize;
use tracing::warn;

/// JSON sent in place of a payload that could not be encoded
pub const FALLBACK_PAYLOAD: &str = r#"{"error":"unserializable payload"}"#;

/// Encode a payload as JSON, substituting [`FALLBACK_PAYLOAD`] on failure.
pub fn serialize<T: Serialize + ?Sized>(payload: &T) -> String {
    match serde_json::to_string(payload) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Payload could not be serialized, sending fallback");
            FALLBACK_PAYLOAD.to_owned()
        }
    }
}

/// Produce the complete wire frame for one message: `data: <json>\n\n`.
pub fn format_message<T: Serialize + ?Sized>(payload: &T) -> String {
    let json = serialize(payload);
    let mut frame = String::with_capacity(json.len() + 8);
    frame.push_str("data: ");
    frame.push_str(&json);
    frame.push_str("\n\n");
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn fallback_matches_encoded_error_object() {
        let encoded =
            serde_json::to_string(&serde_json::json!({"error": "unserializable payload"})).unwrap();
        assert_eq!(FALLBACK_PAYLOAD, encoded);
    }

    #[test]
    fn non_string_map_keys_fall_back() {
        let mut payload = HashMap::new();
        payload.insert((1, 2), "pair");
        assert_eq!(format_message(&payload), "data: {\"error\":\"unserializable payload\"}\n\n");
    }

    #[test]
    fn keeps_field_order() {
        let payload = serde_json::json!({"type": "tick", "utc": "now", "seq": 3});
        assert_eq!(
            format_message(&payload),
            "data: {\"type\":\"tick\",\"utc\":\"now\",\"seq\":3}\n\n"
        );
    }
}
