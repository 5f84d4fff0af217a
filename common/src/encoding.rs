//! Canonical encoding.
//!
//! Signatures, transaction hashes, fingerprint contributions and snapshot
//! documents are all computed over *canonical JSON*: object keys sorted at
//! every nesting level, integers as bare JSON integers, fractional numbers
//! as tagged fixed-point objects, and no binary floats. `serde_json`'s
//! default map is ordered, so sorting happens structurally; this module adds
//! the numeric normalization and the wire-form helpers.

use crate::fixed::Fixed;
use serde_json::{Map, Value};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Invalid hex wire form: {0}")]
    InvalidHex(String),

    #[error("Wire bytes are not UTF-8")]
    InvalidUtf8,

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Non-canonical number: {0}")]
    NonCanonicalNumber(String),
}

/// Produce the canonical form of a JSON value.
///
/// - maps are rebuilt (the backing map type keeps keys sorted);
/// - `{"__fixed__": "..."}` literals are parsed and re-emitted, collapsing
///   integral values to bare integers;
/// - floats are converted through their shortest decimal literal so a value
///   that arrived as `1.5` and one that arrived as `{"__fixed__":"1.5"}`
///   canonicalize identically.
pub fn canonicalize(value: &Value) -> Result<Value, EncodingError> {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(value.clone()),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Ok(value.clone())
            } else {
                // Binary floats are not allowed to survive: route through
                // the decimal literal so every node re-encodes identically.
                let literal = n.to_string();
                let fixed = Fixed::from_str(&literal)
                    .map_err(|_| EncodingError::NonCanonicalNumber(literal))?;
                Ok(fixed.to_value())
            }
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(canonicalize(item)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            if let Some(fixed) = Fixed::from_value(value) {
                return Ok(fixed.to_value());
            }
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), canonicalize(v)?);
            }
            Ok(Value::Object(out))
        }
    }
}

/// Canonical JSON string of a value.
pub fn to_canonical_json(value: &Value) -> Result<String, EncodingError> {
    let canonical = canonicalize(value)?;
    serde_json::to_string(&canonical).map_err(|e| EncodingError::InvalidJson(e.to_string()))
}

/// Decode the transaction wire form: the raw bytes are the UTF-8 text of a
/// hex string, which decodes to the UTF-8 bytes of a JSON document.
pub fn decode_hex_json(raw: &[u8]) -> Result<Value, EncodingError> {
    let hex_str = std::str::from_utf8(raw).map_err(|_| EncodingError::InvalidUtf8)?;
    let json_bytes =
        hex::decode(hex_str.trim()).map_err(|e| EncodingError::InvalidHex(e.to_string()))?;
    let json_str = std::str::from_utf8(&json_bytes).map_err(|_| EncodingError::InvalidUtf8)?;
    serde_json::from_str(json_str).map_err(|e| EncodingError::InvalidJson(e.to_string()))
}

/// Encode a value into the hex wire form. Test fixtures and the genesis
/// authoring path use this; the daemon only ever decodes.
pub fn encode_hex_json(value: &Value) -> Result<String, EncodingError> {
    let json = to_canonical_json(value)?;
    Ok(hex::encode(json.as_bytes()))
}

/// Type tag attached to query responses so callers can decode the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    Int,
    Decimal,
    Json,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Str => "str",
            ValueKind::Int => "int",
            ValueKind::Decimal => "decimal",
            ValueKind::Json => "json",
        }
    }
}

/// Render a state value for the query surface, returning the payload bytes
/// and the type tag the caller should decode them as.
pub fn render_typed(value: &Value) -> (Vec<u8>, ValueKind) {
    match value {
        Value::String(s) => (s.clone().into_bytes(), ValueKind::Str),
        Value::Number(n) if n.is_i64() || n.is_u64() => {
            (n.to_string().into_bytes(), ValueKind::Int)
        }
        Value::Object(_) if Fixed::from_value(value).is_some() => {
            let fixed = Fixed::from_value(value).unwrap_or(Fixed::ZERO);
            (fixed.to_string().into_bytes(), ValueKind::Decimal)
        }
        other => {
            let json = serde_json::to_string(other).unwrap_or_default();
            (json.into_bytes(), ValueKind::Json)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sort_at_every_level() {
        let value: Value =
            serde_json::from_str(r#"{"b":1,"a":{"z":1,"y":{"q":2,"p":3}},"c":[{"n":1,"m":2}]}"#)
                .unwrap();
        let canonical = to_canonical_json(&value).unwrap();
        assert_eq!(
            canonical,
            r#"{"a":{"y":{"p":3,"q":2},"z":1},"b":1,"c":[{"m":2,"n":1}]}"#
        );
    }

    #[test]
    fn test_fixed_tag_normalization() {
        // Integral fixed collapses to a bare integer
        let value = json!({"amount": {"__fixed__": "5.000"}});
        assert_eq!(to_canonical_json(&value).unwrap(), r#"{"amount":5}"#);

        // Fractional fixed keeps the tag with a trimmed literal
        let value = json!({"amount": {"__fixed__": "5.2500"}});
        assert_eq!(
            to_canonical_json(&value).unwrap(),
            r#"{"amount":{"__fixed__":"5.25"}}"#
        );
    }

    #[test]
    fn test_float_routes_through_fixed() {
        let value = json!({"amount": 1.5});
        assert_eq!(
            to_canonical_json(&value).unwrap(),
            r#"{"amount":{"__fixed__":"1.5"}}"#
        );
    }

    #[test]
    fn test_wire_round_trip() {
        let value = json!({"nonce": 1, "sender": "ab", "kwargs": {"to": "bob", "amount": 100}});
        let wire = encode_hex_json(&value).unwrap();
        let decoded = decode_hex_json(wire.as_bytes()).unwrap();
        assert_eq!(canonicalize(&decoded).unwrap(), canonicalize(&value).unwrap());
    }

    #[test]
    fn test_decode_rejects_bad_hex() {
        assert!(matches!(
            decode_hex_json(b"zzzz"),
            Err(EncodingError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_json() {
        let wire = hex::encode(b"{not json");
        assert!(matches!(
            decode_hex_json(wire.as_bytes()),
            Err(EncodingError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_render_typed() {
        let (v, k) = render_typed(&json!("hello"));
        assert_eq!((v.as_slice(), k), (b"hello".as_slice(), ValueKind::Str));

        let (v, k) = render_typed(&json!(42));
        assert_eq!((v.as_slice(), k), (b"42".as_slice(), ValueKind::Int));

        let (v, k) = render_typed(&json!({"__fixed__": "1.5"}));
        assert_eq!((v.as_slice(), k), (b"1.5".as_slice(), ValueKind::Decimal));

        let (_, k) = render_typed(&json!({"a": 1}));
        assert_eq!(k, ValueKind::Json);
    }
}
