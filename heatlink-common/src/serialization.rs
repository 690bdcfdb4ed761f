use serde::Serialize;

use crate::error::{Error, Result};

/// Encode a value as a single line of JSON (no trailing newline).
pub fn encode_line<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Error::from)
}
