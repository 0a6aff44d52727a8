use serde::Deserialize;

use super::ConfigSnapshot;
use crate::DecodeError;

/// The two legal shapes of a node payload (UTF-8 JSON).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// `["/pathA", "/pathB"]`: further nodes to resolve, in order
    Indirection(Vec<String>),
    /// `{"key": "value"}`
    Snapshot(ConfigSnapshot),
}

impl Payload {
    /// Decode a payload, preferring the indirection shape.
    pub fn decode(
        path: &str,
        data: &[u8],
    ) -> Result<Self, DecodeError> {
        ensure_not_empty(path, data)?;
        serde_json::from_slice(data).map_err(|source| DecodeError::UnknownShape {
            path: path.to_string(),
            source,
        })
    }
}

/// Decode a payload that must be a flat key-value object.
pub fn decode_snapshot(
    path: &str,
    data: &[u8],
) -> Result<ConfigSnapshot, DecodeError> {
    ensure_not_empty(path, data)?;
    serde_json::from_slice(data).map_err(|source| DecodeError::NotKeyValue {
        path: path.to_string(),
        source,
    })
}

fn ensure_not_empty(
    path: &str,
    data: &[u8],
) -> Result<(), DecodeError> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty {
            path: path.to_string(),
        });
    }
    Ok(())
}
