//! Relay message codec.
//!
//! Producers publish one MessagePack map per message:
//!
//! ```text
//! { "method": "POST", "path": "/events", "data": { ... } }
//! ```
//!
//! The key set must be exactly `{method, path, data}`. Anything else is a
//! [`DecodeError`], which the relay logs and drops.

use crate::error::DecodeError;
use serde::de::Deserialize;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

const KEYS: [&str; 3] = ["method", "path", "data"];

/// HTTP verbs the remote API is called with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HttpMethod {
    #[serde(rename = "POST")]
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POST" => Ok(HttpMethod::Post),
            other => Err(DecodeError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Post => reqwest::Method::POST,
        }
    }
}

/// One validated unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayMessage {
    method: HttpMethod,
    path: String,
    data: Map<String, Value>,
}

impl RelayMessage {
    pub fn new(method: HttpMethod, path: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            method,
            path: path.into(),
            data,
        }
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// API path, relative to the configured base URL.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// JSON request body.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

/// Decode and validate one broker payload.
pub fn decode(raw: &[u8]) -> Result<RelayMessage, DecodeError> {
    let mut cursor = Cursor::new(raw);
    let mut fields = {
        let mut deserializer = rmp_serde::Deserializer::new(&mut cursor);
        Map::<String, Value>::deserialize(&mut deserializer)?
    };

    let consumed = cursor.position() as usize;
    if consumed < raw.len() {
        return Err(DecodeError::TrailingBytes(raw.len() - consumed));
    }

    let has_expected_keys =
        fields.keys().map(String::as_str).collect::<BTreeSet<_>>() == BTreeSet::from(KEYS);
    if !has_expected_keys {
        return Err(DecodeError::UnexpectedKeys(Value::Object(fields).to_string()));
    }

    let method = match fields.remove("method") {
        Some(Value::String(method)) => method.parse::<HttpMethod>()?,
        other => return Err(invalid_field("method", "a string", other)),
    };
    let path = match fields.remove("path") {
        Some(Value::String(path)) => path,
        other => return Err(invalid_field("path", "a string", other)),
    };
    let data = match fields.remove("data") {
        Some(Value::Object(data)) => data,
        other => return Err(invalid_field("data", "a map", other)),
    };

    Ok(RelayMessage { method, path, data })
}

/// Encode a message the way producers publish it.
pub fn encode(message: &RelayMessage) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(message)
}

fn invalid_field(field: &'static str, expected: &'static str, found: Option<Value>) -> DecodeError {
    DecodeError::InvalidField {
        field,
        expected,
        found: found.unwrap_or(Value::Null).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected a JSON object"),
        }
    }

    fn pack(value: &Value) -> Vec<u8> {
        rmp_serde::to_vec_named(value).unwrap()
    }

    #[test]
    fn decodes_valid_message() {
        let raw = pack(&json!({
            "method": "POST",
            "path": "/events",
            "data": {"event_name": "applied-step", "user_id": "42", "metadata": {"n": 3}},
        }));

        let message = decode(&raw).unwrap();
        assert_eq!(message.method(), HttpMethod::Post);
        assert_eq!(message.path(), "/events");
        assert_eq!(message.data()["event_name"], "applied-step");
        assert_eq!(message.data()["metadata"]["n"], 3);
    }

    #[test]
    fn encode_then_decode_preserves_fields() {
        let message = RelayMessage::new(
            HttpMethod::Post,
            "/users",
            object(json!({"email": "a@example.com", "tags": ["x", "y"], "score": 1.5})),
        );

        let raw = encode(&message).unwrap();
        assert_eq!(decode(&raw).unwrap(), message);
    }

    #[test]
    fn key_order_on_the_wire_does_not_matter() {
        #[derive(Serialize)]
        struct Reordered<'a> {
            path: &'a str,
            data: Value,
            method: &'a str,
        }

        let raw = rmp_serde::to_vec_named(&Reordered {
            path: "/events",
            data: json!({}),
            method: "POST",
        })
        .unwrap();

        let message = decode(&raw).unwrap();
        assert_eq!(message.path(), "/events");
        assert!(message.data().is_empty());
    }

    #[test]
    fn missing_key_is_rejected() {
        let raw = pack(&json!({"method": "POST", "path": "/events"}));
        let err = decode(&raw).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedKeys(_)));
        assert!(err.to_string().contains("/events"));
    }

    #[test]
    fn extra_key_is_rejected() {
        let raw = pack(&json!({"method": "POST", "path": "/events", "data": {}, "retry": 1}));
        assert!(matches!(
            decode(&raw).unwrap_err(),
            DecodeError::UnexpectedKeys(_)
        ));
    }

    #[test]
    fn unsupported_method_is_rejected() {
        let raw = pack(&json!({"method": "DELETE", "path": "/events", "data": {}}));
        assert!(matches!(
            decode(&raw).unwrap_err(),
            DecodeError::UnsupportedMethod(m) if m == "DELETE"
        ));
    }

    #[test]
    fn wrongly_typed_fields_are_rejected() {
        let raw = pack(&json!({"method": "POST", "path": 7, "data": {}}));
        assert!(matches!(
            decode(&raw).unwrap_err(),
            DecodeError::InvalidField { field: "path", .. }
        ));

        let raw = pack(&json!({"method": "POST", "path": "/events", "data": [1, 2]}));
        assert!(matches!(
            decode(&raw).unwrap_err(),
            DecodeError::InvalidField { field: "data", .. }
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            decode(b"\xc1\xc1\xc1").unwrap_err(),
            DecodeError::Encoding(_)
        ));
        assert!(matches!(decode(b"").unwrap_err(), DecodeError::Encoding(_)));
    }

    #[test]
    fn non_map_payload_is_rejected() {
        let raw = rmp_serde::to_vec(&vec!["POST", "/events"]).unwrap();
        assert!(matches!(decode(&raw).unwrap_err(), DecodeError::Encoding(_)));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut raw = pack(&json!({"method": "POST", "path": "/events", "data": {}}));
        raw.extend_from_slice(&[0x01, 0x02]);
        assert!(matches!(
            decode(&raw).unwrap_err(),
            DecodeError::TrailingBytes(2)
        ));
    }
}
