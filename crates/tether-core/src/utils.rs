//! Hex quantity helpers for block numbers.

use serde_json::Value;

/// Parses a `0x`-prefixed (or bare) hex quantity into a `u64`.
///
/// Returns `None` for empty strings, invalid digits, or values overflowing `u64`.
#[must_use]
pub fn parse_hex_u64(hex: &str) -> Option<u64> {
    let hex_str = hex.strip_prefix("0x").unwrap_or(hex);
    if hex_str.is_empty() {
        return None;
    }
    u64::from_str_radix(hex_str, 16).ok()
}

/// Formats a `u64` as a `0x`-prefixed hex quantity. Zero is formatted as `"0x0"`.
#[must_use]
pub fn format_hex_u64(value: u64) -> String {
    format!("{value:#x}")
}

/// Reads a hex quantity field (`number`, `blockNumber`, ...) from a JSON object.
#[must_use]
pub fn hex_field(value: &Value, field: &str) -> Option<u64> {
    value.get(field).and_then(Value::as_str).and_then(parse_hex_u64)
}
