//! Purpose: Recover JSON from payloads wrapped in extra quote-and-escape layers.
//! Exports: `MAX_UNWRAP_PASSES`, `decode_wrapped`, `fix_malformed_json`.
//! Role: Parser boundary for raw portal responses; centralizes the unwrap heuristic.
//! Invariants: The unwrap loop is counted (no recursion) and bounded at 5 passes.
//! Invariants: Unescaping is one layer per pass: `\"` then `\\`, in that order.
//! Notes: A payload that decodes to a bare string is parsed once more; if the
//! result is still a string, the remainder feeds the next pass.

use crate::core::error::{Error, ErrorKind};
use serde_json::Value;

/// Upper bound on strip/parse passes. Termination guard against pathological
/// or adversarial inputs; observed portal payloads need at most two.
pub const MAX_UNWRAP_PASSES: usize = 5;

/// Decode a possibly quote-wrapped payload into a JSON value.
pub fn decode_wrapped(text: &str) -> Result<Value, Error> {
    let mut current = text.to_string();
    let mut modified = false;

    for _ in 0..MAX_UNWRAP_PASSES {
        if let Some(inner) = strip_quote_layer(&current) {
            current = inner;
            modified = true;
        }
        match serde_json::from_str::<Value>(&current) {
            Ok(Value::String(inner)) => match serde_json::from_str::<Value>(&inner) {
                Ok(Value::String(deeper)) => {
                    // Still string-wrapped after two parses; keep peeling.
                    current = deeper;
                    modified = true;
                }
                Ok(value) => return Ok(value),
                Err(_) => {}
            },
            Ok(value) => return Ok(value),
            Err(_) => {}
        }
    }

    if !modified {
        if let Ok(value) = serde_json::from_str::<Value>(&current) {
            return Ok(value);
        }
    }

    Err(Error::new(ErrorKind::Decode)
        .with_message("input does not decode to JSON after unwrapping")
        .with_hint("Check that the payload is JSON wrapped in at most 5 quote layers."))
}

/// Normalize a malformed payload into pretty-printed (2-space indent) JSON text.
pub fn fix_malformed_json(text: &str) -> Result<String, Error> {
    let value = decode_wrapped(text)?;
    serde_json::to_string_pretty(&value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to serialize decoded json")
            .with_source(err)
    })
}

/// Strip one wrapping layer: outer double quotes plus one level of escapes.
/// Returns `None` when the text is not quote-wrapped.
fn strip_quote_layer(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'"' || bytes[bytes.len() - 1] != b'"' {
        return None;
    }
    let inner = &text[1..text.len() - 1];
    Some(inner.replace("\\\"", "\"").replace("\\\\", "\\"))
}
