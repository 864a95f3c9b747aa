#![forbid(unsafe_code)]

use super::*;
use std::collections::VecDeque;

impl SqliteStore {
    pub fn create_label(&mut self, name: &str) -> Result<(), StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidInput("label must not be empty"));
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO labels(name) VALUES (?1)",
            params![name],
        )?;
        Ok(())
    }

    pub fn attach_change_label(&mut self, label: &str, change_id: &str) -> Result<(), StoreError> {
        self.change_get(change_id)?;
        let tx = self.conn.transaction()?;
        ensure_label_exists_tx(&tx, label)?;
        tx.execute(
            "INSERT OR IGNORE INTO change_labels(label, change_id) VALUES (?1, ?2)",
            params![label, change_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn attach_change_set_label(
        &mut self,
        label: &str,
        change_set_id: &str,
    ) -> Result<(), StoreError> {
        self.change_set_get(change_set_id)?;
        let tx = self.conn.transaction()?;
        ensure_label_exists_tx(&tx, label)?;
        tx.execute(
            "INSERT OR IGNORE INTO change_set_labels(label, change_set_id) VALUES (?1, ?2)",
            params![label, change_set_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn change_has_label(&self, change_id: &str, label: &str) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM change_labels WHERE label=?1 AND change_id=?2",
                params![label, change_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn change_set_has_label(
        &self,
        change_set_id: &str,
        label: &str,
    ) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM change_set_labels WHERE label=?1 AND change_set_id=?2",
                params![label, change_set_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Nearest ancestor of `change_id` carrying `label`, breadth-first over
    /// parent edges. The starting change itself is not a candidate.
    pub fn nearest_labeled_ancestor(
        &self,
        change_id: &str,
        label: &str,
    ) -> Result<Option<Change>, StoreError> {
        self.change_get(change_id)?;

        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(change_id.to_string());
        seen.insert(change_id.to_string());

        while let Some(id) = queue.pop_front() {
            let mut stmt = self.conn.prepare(
                "SELECT c.id, c.entity_id, c.file_id, c.schema_key, c.snapshot_id, c.created_at_ms \
                 FROM change_edges e JOIN changes c ON c.id = e.parent_id \
                 WHERE e.child_id=?1 \
                 ORDER BY c.id ASC",
            )?;
            let mut rows = stmt.query(params![id])?;
            while let Some(row) = rows.next()? {
                let parent = change_from_row(row)?;
                if !seen.insert(parent.id.clone()) {
                    continue;
                }
                if self.change_has_label(&parent.id, label)? {
                    return Ok(Some(parent));
                }
                queue.push_back(parent.id.clone());
            }
        }

        Ok(None)
    }
}

fn ensure_label_exists_tx(tx: &Transaction<'_>, label: &str) -> Result<(), StoreError> {
    let exists = tx
        .query_row(
            "SELECT 1 FROM labels WHERE name=?1",
            params![label],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some();

    if exists {
        Ok(())
    } else {
        Err(StoreError::UnknownLabel)
    }
}
