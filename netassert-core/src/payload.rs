//! Per-target test payload handed to the test container.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Map, Value};

/// Environment variable carrying the encoded payload into the container.
pub const PAYLOAD_ENV: &str = "TARGETS";

/// One target's assertions, re-wrapped under the synthetic key
/// `_<identifier>` inside a `host` section.
///
/// Inside the test container every target is the host whose network it
/// shares, so the shape is the same for both classes.
#[derive(Debug, Clone, PartialEq)]
pub struct TestPayload {
    key: String,
    document: Value,
}

impl TestPayload {
    /// Wrap a target's assertions.
    pub fn wrap(target_id: &str, assertions: Value) -> Self {
        let key = format!("_{}", target_id);
        let mut section = Map::new();
        section.insert(key.clone(), assertions);
        let document = json!({ "host": section });
        Self { key, document }
    }

    /// The synthetic key (`_<identifier>`).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The wrapped document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Compact JSON, base64 (standard alphabet).
    pub fn encode(&self) -> String {
        STANDARD.encode(self.document.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_under_synthetic_key() {
        let payload = TestPayload::wrap("web:frontend", json!(["tcp:80"]));
        assert_eq!(payload.key(), "_web:frontend");
        assert_eq!(
            payload.document(),
            &json!({"host": {"_web:frontend": ["tcp:80"]}})
        );
    }

    #[test]
    fn encodes_compact_json() {
        let payload = TestPayload::wrap("localhost", json!(["80/tcp open"]));
        let decoded = STANDARD.decode(payload.encode()).unwrap();
        assert_eq!(
            String::from_utf8(decoded).unwrap(),
            r#"{"host":{"_localhost":["80/tcp open"]}}"#
        );
    }

    #[test]
    fn encoding_is_shell_safe() {
        let payload = TestPayload::wrap("db'; rm -rf /", json!({"$(id)": "`x`"}));
        assert!(payload
            .encode()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')));
    }
}
