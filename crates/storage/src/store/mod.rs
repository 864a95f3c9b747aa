#![forbid(unsafe_code)]

mod branches;
mod changes;
mod commit;
mod error;
mod files;
mod labels;
mod query;
mod requests;
mod snapshots;
mod types;

pub use error::StoreError;
pub use requests::*;
pub use types::*;

use fl_core::ids::{BranchName, EntityId, FileId, SchemaKey};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, params};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BRANCH: &str = "main";
const SCHEMA_VERSION: &str = "v1";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join("filament.db");
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        install_schema(&conn)?;

        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn default_branch_name(&self) -> &'static str {
        DEFAULT_BRANCH
    }
}

fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS counters (
          name TEXT PRIMARY KEY,
          value INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS snapshots (
          id TEXT PRIMARY KEY,
          content TEXT
        );

        CREATE TABLE IF NOT EXISTS changes (
          id TEXT PRIMARY KEY,
          entity_id TEXT NOT NULL,
          file_id TEXT NOT NULL,
          schema_key TEXT NOT NULL,
          snapshot_id TEXT NOT NULL REFERENCES snapshots(id),
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS change_edges (
          parent_id TEXT NOT NULL REFERENCES changes(id),
          child_id TEXT NOT NULL REFERENCES changes(id),
          PRIMARY KEY (parent_id, child_id)
        );

        CREATE TABLE IF NOT EXISTS change_sets (
          id TEXT PRIMARY KEY,
          parent_id TEXT REFERENCES change_sets(id),
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS change_set_elements (
          change_set_id TEXT NOT NULL REFERENCES change_sets(id),
          change_id TEXT NOT NULL REFERENCES changes(id),
          PRIMARY KEY (change_set_id, change_id)
        );

        CREATE TABLE IF NOT EXISTS branches (
          name TEXT PRIMARY KEY,
          head_change_set_id TEXT REFERENCES change_sets(id),
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS labels (
          name TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS change_labels (
          label TEXT NOT NULL REFERENCES labels(name),
          change_id TEXT NOT NULL REFERENCES changes(id),
          PRIMARY KEY (label, change_id)
        );

        CREATE TABLE IF NOT EXISTS change_set_labels (
          label TEXT NOT NULL REFERENCES labels(name),
          change_set_id TEXT NOT NULL REFERENCES change_sets(id),
          PRIMARY KEY (label, change_set_id)
        );

        CREATE TABLE IF NOT EXISTS files (
          id TEXT PRIMARY KEY,
          path TEXT NOT NULL,
          schema_key TEXT NOT NULL,
          data BLOB,
          diffed_data BLOB,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_changes_entity ON changes(entity_id);
        CREATE INDEX IF NOT EXISTS idx_edges_child ON change_edges(child_id);
        CREATE INDEX IF NOT EXISTS idx_elements_set ON change_set_elements(change_set_id);
        "#,
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", SCHEMA_VERSION],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO labels(name) VALUES (?1)",
        params!["confirmed"],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO branches(name, head_change_set_id, created_at_ms, updated_at_ms) \
         VALUES (?1, NULL, ?2, ?2)",
        params![DEFAULT_BRANCH, now_ms()],
    )?;
    Ok(())
}

#[derive(Clone, Debug)]
pub(crate) struct BranchState {
    pub head_change_set_id: Option<String>,
    pub updated_at_ms: i64,
}

pub(crate) fn branch_state_tx(
    tx: &Transaction<'_>,
    branch: &str,
) -> Result<BranchState, StoreError> {
    let value = tx
        .query_row(
            "SELECT head_change_set_id, updated_at_ms FROM branches WHERE name=?1",
            params![branch],
            |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;

    match value {
        Some((head_change_set_id, updated_at_ms)) => Ok(BranchState {
            head_change_set_id,
            updated_at_ms,
        }),
        None => Err(StoreError::UnknownBranch),
    }
}

/// Walks the changeset spine backward from `head`, newest first. A repeated
/// id would mean a corrupted spine, so the walk guards against cycles.
pub(crate) fn visible_change_sets_tx(
    tx: &Transaction<'_>,
    head: Option<&str>,
) -> Result<Vec<String>, StoreError> {
    let mut out = Vec::new();
    let mut seen = BTreeSet::new();
    let mut current = head.map(|value| value.to_string());

    while let Some(id) = current {
        if !seen.insert(id.clone()) {
            return Err(StoreError::InvalidInput("changeset spine contains a cycle"));
        }
        let parent = tx
            .query_row(
                "SELECT parent_id FROM change_sets WHERE id=?1",
                params![id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        let Some(parent) = parent else {
            return Err(StoreError::UnknownChangeSet);
        };
        out.push(id);
        current = parent;
    }

    Ok(out)
}

/// Most recent change for `entity_id` on the path walked backward from
/// `head`. Includes deletion markers; callers decide whether to surface them.
pub(crate) fn entity_head_tx(
    tx: &Transaction<'_>,
    entity_id: &str,
    head: Option<&str>,
) -> Result<Option<Change>, StoreError> {
    for change_set_id in visible_change_sets_tx(tx, head)? {
        let change = tx
            .query_row(
                "SELECT c.id, c.entity_id, c.file_id, c.schema_key, c.snapshot_id, c.created_at_ms \
                 FROM change_set_elements e JOIN changes c ON c.id = e.change_id \
                 WHERE e.change_set_id=?1 AND c.entity_id=?2 \
                 ORDER BY c.id DESC LIMIT 1",
                params![change_set_id, entity_id],
                change_from_row,
            )
            .optional()?;
        if change.is_some() {
            return Ok(change);
        }
    }
    Ok(None)
}

pub(crate) fn change_from_row(row: &rusqlite::Row<'_>) -> Result<Change, rusqlite::Error> {
    Ok(Change {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        file_id: row.get(2)?,
        schema_key: row.get(3)?,
        snapshot_id: row.get(4)?,
        created_at_ms: row.get(5)?,
    })
}

pub(crate) fn next_counter_tx(tx: &Transaction<'_>, name: &str) -> Result<i64, StoreError> {
    let current: i64 = tx
        .query_row(
            "SELECT value FROM counters WHERE name=?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);
    let next = current + 1;
    tx.execute(
        r#"
        INSERT INTO counters(name, value) VALUES (?1, ?2)
        ON CONFLICT(name) DO UPDATE SET value=excluded.value
        "#,
        params![name, next],
    )?;
    Ok(next)
}

pub(crate) fn map_insert_conflict(err: rusqlite::Error) -> StoreError {
    if is_constraint_violation(&err) {
        return StoreError::BranchAlreadyExists;
    }
    StoreError::Sql(err)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

pub(crate) fn canonicalize_entity(value: &str) -> Result<String, StoreError> {
    EntityId::try_new(value)
        .map(EntityId::into_string)
        .map_err(|err| StoreError::InvalidInput(err.message()))
}

pub(crate) fn canonicalize_file(value: &str) -> Result<String, StoreError> {
    FileId::try_new(value)
        .map(FileId::into_string)
        .map_err(|err| StoreError::InvalidInput(err.message()))
}

pub(crate) fn canonicalize_branch(value: &str) -> Result<String, StoreError> {
    BranchName::try_new(value)
        .map(BranchName::into_string)
        .map_err(|err| StoreError::InvalidInput(err.message()))
}

pub(crate) fn canonicalize_schema(value: &str) -> Result<String, StoreError> {
    SchemaKey::try_new(value)
        .map(SchemaKey::into_string)
        .map_err(|err| StoreError::InvalidInput(err.message()))
}

pub(crate) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration,
        Err(_) => return 0,
    };

    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
