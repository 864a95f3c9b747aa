#![forbid(unsafe_code)]

use super::*;
use fl_core::snapshot::{canonical_json, snapshot_id};
use serde_json::Value;

impl SqliteStore {
    /// Idempotent content-addressed insert. Storing the same content twice
    /// yields the same id and a single stored row.
    pub fn snapshot_put(&mut self, content: Option<&Value>) -> Result<String, StoreError> {
        let tx = self.conn.transaction()?;
        let id = snapshot_put_tx(&tx, content)?;
        tx.commit()?;
        Ok(id)
    }

    /// Returns the stored content, `Ok(None)` for the deletion marker, and
    /// `UnknownSnapshot` for ids that were never stored.
    pub fn snapshot_get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT content FROM snapshots WHERE id=?1",
                params![id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;

        match row {
            Some(Some(content)) => Ok(Some(serde_json::from_str(&content)?)),
            Some(None) => Ok(None),
            None => Err(StoreError::UnknownSnapshot),
        }
    }
}

pub(crate) fn snapshot_put_tx(
    tx: &Transaction<'_>,
    content: Option<&Value>,
) -> Result<String, StoreError> {
    let id = snapshot_id(content).into_string();
    let serialized = content.map(canonical_json);
    tx.execute(
        "INSERT OR IGNORE INTO snapshots(id, content) VALUES (?1, ?2)",
        params![id, serialized],
    )?;
    Ok(id)
}
