#![forbid(unsafe_code)]

pub mod diff;
pub mod ids;
pub mod snapshot;

pub use diff::{DiffError, DiffMeta, DiffOperation, DiffPlugin, DiffReport, classify, entity_key};
pub use ids::{BranchName, EntityId, FileId, SchemaKey};
pub use snapshot::{DELETION_SNAPSHOT_ID, SnapshotId, canonical_json, snapshot_id};
