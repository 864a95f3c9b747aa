#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOperation {
    Create,
    Update,
    Delete,
}

impl DiffOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Stable identity used to correlate `old`/`neu` across calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffMeta {
    pub id: String,
}

/// One entity-level difference between two versions of a file blob. This is
/// the sole channel through which byte differences become semantic changes;
/// the engine never inspects blob bytes itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub operation: DiffOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neu: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<DiffMeta>,
}

#[derive(Debug)]
pub enum DiffError {
    /// Blob is not a valid embedded database. Sticky for the affected file
    /// until a later write corrects it.
    Malformed(String),
    /// Transient plugin failure; the scheduler retries.
    Plugin(String),
}

impl std::fmt::Display for DiffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(message) => write!(f, "malformed blob: {message}"),
            Self::Plugin(message) => write!(f, "diff plugin failed: {message}"),
        }
    }
}

impl std::error::Error for DiffError {}

/// Capability contract a diff module implements to turn two versions of a
/// file blob into entity-level change reports.
///
/// Exactly one of `old`/`neu` may be absent (whole-file create/delete).
/// Implementations must enumerate their declared entity types in a fixed,
/// deterministic order so report ordering is reproducible.
pub trait DiffPlugin: Send + Sync {
    fn schema_key(&self) -> &str;

    fn entity_types(&self) -> Vec<String>;

    fn diff_file(
        &self,
        old: Option<&[u8]>,
        neu: Option<&[u8]>,
    ) -> Result<Vec<DiffReport>, DiffError>;
}

/// Classifies a single entity transition. Returns `None` when `old` and `neu`
/// are structurally equal (JSON object comparison is key-order insensitive).
pub fn classify(old: Option<&Value>, neu: Option<&Value>) -> Option<DiffOperation> {
    match (old, neu) {
        (None, None) => None,
        (None, Some(_)) => Some(DiffOperation::Create),
        (Some(_), None) => Some(DiffOperation::Delete),
        (Some(old), Some(neu)) => {
            if old == neu {
                None
            } else {
                Some(DiffOperation::Update)
            }
        }
    }
}

/// Resolves the entity identity of a report: `meta.id` when present,
/// otherwise the `id` property of `neu`, then `old`.
pub fn entity_key(report: &DiffReport) -> Option<String> {
    if let Some(meta) = &report.meta {
        return Some(meta.id.clone());
    }
    for value in [&report.neu, &report.old] {
        if let Some(id) = value
            .as_ref()
            .and_then(|v| v.get("id"))
            .and_then(|v| v.as_str())
        {
            return Some(id.to_string());
        }
    }
    None
}
