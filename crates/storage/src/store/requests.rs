#![forbid(unsafe_code)]

use serde_json::Value;

/// One change to commit. `content = None` is the deletion marker;
/// `declared_parent` pins the expected causal parent (optimistic concurrency,
/// checked against the entity head at commit time).
#[derive(Clone, Debug, PartialEq)]
pub struct NewChange {
    pub entity_id: String,
    pub file_id: String,
    pub schema_key: String,
    pub content: Option<Value>,
    pub declared_parent: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommitChangeSetRequest {
    pub branch: String,
    pub expected_head: Option<String>,
    pub changes: Vec<NewChange>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateBranchRequest {
    pub name: String,
    pub from: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdvanceBranchRequest {
    pub branch: String,
    pub change_set_id: String,
}

/// Composable relational filter over the change table. All fields are
/// conjunctive; `branch` scopes to changes reachable from the branch head,
/// `label` to labeled changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeQuery {
    pub branch: Option<String>,
    pub entity_id: Option<String>,
    pub file_id: Option<String>,
    pub schema_key: Option<String>,
    pub label: Option<String>,
}
