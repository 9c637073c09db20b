//! Response decoding and key normalization
//!
//! OANDA payloads use camelCase keys (`accountID`, `openTrades`); callers on
//! this side work in snake_case. `decode` parses a JSON body and rewrites
//! every key recursively, including through arrays of objects. The rewrite is
//! idempotent: feeding an already-normalized structure through it again is a
//! no-op, so decoded values can be re-processed safely.

use serde_json::Value;

use crate::error::{Error, Result};

/// Parse a raw JSON body and normalize all keys to snake_case.
pub fn decode(raw: &str) -> Result<Value> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| Error::DecodeFailure(e.to_string()))?;
    Ok(normalize_keys(value))
}

/// Recursively rewrite object keys from camelCase to snake_case.
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, val)| (snake_case_key(&key), normalize_keys(val)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        scalar => scalar,
    }
}

/// Convert one key to snake_case.
///
/// A run of uppercase letters is one acronym token lower-cased as a unit:
/// `accountID` → `account_id`, `NAVValue` → `nav_value`. Keys that are
/// already snake_case pass through unchanged.
fn snake_case_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_ascii_uppercase() {
            out.push(c);
            continue;
        }
        let boundary = match chars.get(i.wrapping_sub(1)) {
            None => false,
            Some('_') => false,
            // Inside an uppercase run: split only before the run's last
            // letter when it starts a new lowercase word (NAVValue → nav_value).
            Some(p) if p.is_ascii_uppercase() => {
                matches!(chars.get(i + 1), Some(n) if n.is_ascii_lowercase())
            }
            Some(_) => true,
        };
        if boundary {
            out.push('_');
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}
