#![forbid(unsafe_code)]

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Snapshot id of the deletion marker: changes whose snapshot carries no
/// content reference this well-known id instead of a content hash.
pub const DELETION_SNAPSHOT_ID: &str = "no-content";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn no_content() -> Self {
        Self(DELETION_SNAPSHOT_ID.to_string())
    }

    pub fn is_deletion(&self) -> bool {
        self.0 == DELETION_SNAPSHOT_ID
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, SnapshotIdError> {
        let value = value.into();
        validate_snapshot_id(&value)?;
        Ok(Self(value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotIdError {
    InvalidFormat,
}

impl SnapshotIdError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidFormat => "snapshot id must be 64 lowercase hex characters",
        }
    }
}

fn validate_snapshot_id(value: &str) -> Result<(), SnapshotIdError> {
    if value == DELETION_SNAPSHOT_ID {
        return Ok(());
    }
    if value.len() != 64 {
        return Err(SnapshotIdError::InvalidFormat);
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err(SnapshotIdError::InvalidFormat);
    }
    Ok(())
}

/// Deterministic JSON encoding: object keys recursively sorted, no
/// insignificant whitespace. Two logically-equal values always encode to the
/// same string regardless of key insertion order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json's string escaping is deterministic.
            out.push_str(&Value::String(s.clone()).to_string());
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

/// Content-addressed snapshot identity. `None` is the deletion marker.
pub fn snapshot_id(content: Option<&Value>) -> SnapshotId {
    let Some(content) = content else {
        return SnapshotId::no_content();
    };
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(content).as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    SnapshotId(hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let a = canonical_json(&json!({"b": 1, "a": {"z": true, "y": [1, 2]}}));
        let b = canonical_json(&json!({"a": {"y": [1, 2], "z": true}, "b": 1}));
        assert_eq!(a, b);
        assert_eq!(a, r#"{"a":{"y":[1,2],"z":true},"b":1}"#);
    }

    #[test]
    fn snapshot_id_is_key_order_independent() {
        let a = snapshot_id(Some(&json!({"id": "1", "locale": "en"})));
        let b = snapshot_id(Some(&json!({"locale": "en", "id": "1"})));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn snapshot_id_differs_for_different_content() {
        let a = snapshot_id(Some(&json!({"id": "1"})));
        let b = snapshot_id(Some(&json!({"id": "2"})));
        assert_ne!(a, b);
    }

    #[test]
    fn deletion_marker_has_well_known_id() {
        let id = snapshot_id(None);
        assert!(id.is_deletion());
        assert_eq!(id.as_str(), DELETION_SNAPSHOT_ID);
    }

    #[test]
    fn snapshot_id_validation() {
        assert!(SnapshotId::try_new(DELETION_SNAPSHOT_ID).is_ok());
        assert!(SnapshotId::try_new("a".repeat(64)).is_ok());
        assert_eq!(
            SnapshotId::try_new("short").unwrap_err(),
            SnapshotIdError::InvalidFormat
        );
        assert_eq!(
            SnapshotId::try_new("G".repeat(64)).unwrap_err(),
            SnapshotIdError::InvalidFormat
        );
    }
}
