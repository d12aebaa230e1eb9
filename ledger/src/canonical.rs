//! # Canonical JSON
//!
//! The byte-exact JSON serialization used for block hashing and transaction
//! signing. This encoding is the only cross-party contract that bites: the
//! signer, every verifier, and every hasher must produce the identical byte
//! string for the same logical value, or signatures break across nodes.
//!
//! ## Rules
//!
//! - Object keys sorted ascending by Unicode code point.
//! - No insignificant whitespace (`,` and `:` separators only).
//! - UTF-8 output; non-ASCII characters are emitted raw, not `\u`-escaped.
//! - Numbers are written in their raw decimal representation, unnormalized.
//! - Booleans lowercase; `null` for JSON null.
//! - Arrays and nested objects are canonicalized recursively.
//!
//! Pinned byte-for-byte test vectors live in the test module below. Do not
//! touch this file without updating them — and do not touch the vectors
//! without a protocol version bump.

use serde::Serialize;
use serde_json::Value;

use crate::error::LedgerError;

/// Canonicalizes any serializable value.
///
/// Serialization into a [`Value`] can fail for types that are not valid JSON
/// (e.g. maps with non-string keys); that surfaces as `BadRequest`.
pub fn to_canonical<T: Serialize>(value: &T) -> Result<String, LedgerError> {
    let json = serde_json::to_value(value)
        .map_err(|e| LedgerError::BadRequest(format!("cannot canonicalize value: {e}")))?;
    Ok(canonical_string(&json))
}

/// Canonicalizes any serializable value into its UTF-8 bytes.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, LedgerError> {
    Ok(to_canonical(value)?.into_bytes())
}

/// Writes a parsed JSON value in canonical form.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        // serde_json's Display for Number is the raw decimal representation
        // the value was parsed with — no re-normalization.
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Rust `str` ordering is byte order, which for UTF-8 coincides
            // with Unicode code point order.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}

/// JSON string escaping: the two mandatory escapes plus control characters.
/// Everything else — including non-ASCII — is emitted as raw UTF-8.
fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
