#![forbid(unsafe_code)]

/// One append-only change record: links an entity to a snapshot at one point
/// in causal history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    pub id: String,
    pub entity_id: String,
    pub file_id: String,
    pub schema_key: String,
    pub snapshot_id: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeSet {
    pub id: String,
    pub parent_id: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    pub head_change_set_id: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedFile {
    pub id: String,
    pub path: String,
    pub schema_key: String,
    pub data: Option<Vec<u8>>,
    pub diffed_data: Option<Vec<u8>>,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedChangeSet {
    pub change_set: ChangeSet,
    pub changes: Vec<Change>,
}
