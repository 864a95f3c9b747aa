#![forbid(unsafe_code)]

use super::*;
use crate::store::snapshots::snapshot_put_tx;
use std::collections::BTreeSet;

impl SqliteStore {
    /// Commits one changeset atomically: snapshots, changes, causal edges,
    /// membership rows and the branch head move either all persist or none
    /// do. `expected_head` mismatching the stored head is a lost optimistic
    /// race and fails with `StaleBranch` before anything is written.
    pub fn commit_change_set(
        &mut self,
        request: CommitChangeSetRequest,
    ) -> Result<CommittedChangeSet, StoreError> {
        let branch = canonicalize_branch(&request.branch)?;
        if request.changes.is_empty() {
            return Err(StoreError::InvalidInput("changes must not be empty"));
        }

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        let state = branch_state_tx(&tx, &branch)?;
        if request.expected_head != state.head_change_set_id {
            return Err(StoreError::StaleBranch {
                branch,
                expected: request.expected_head,
                actual: state.head_change_set_id,
            });
        }

        let mut seen_entities = BTreeSet::new();
        let mut changes = Vec::with_capacity(request.changes.len());
        for new_change in &request.changes {
            let entity_id = canonicalize_entity(&new_change.entity_id)?;
            let file_id = canonicalize_file(&new_change.file_id)?;
            let schema_key = canonicalize_schema(&new_change.schema_key)?;
            if !seen_entities.insert(entity_id.clone()) {
                return Err(StoreError::InvalidInput(
                    "changeset contains two changes for the same entity",
                ));
            }

            let parent = entity_head_tx(&tx, &entity_id, state.head_change_set_id.as_deref())?;
            if let Some(declared) = &new_change.declared_parent {
                if parent.as_ref().map(|change| change.id.as_str()) != Some(declared.as_str()) {
                    return Err(StoreError::ParentNotHead {
                        entity_id,
                        declared: declared.clone(),
                        head: parent.map(|change| change.id),
                    });
                }
            }

            let snapshot_id = snapshot_put_tx(&tx, new_change.content.as_ref())?;
            let seq = next_counter_tx(&tx, "change_seq")?;
            let id = format!("chg_{seq:016}");
            tx.execute(
                "INSERT INTO changes(id, entity_id, file_id, schema_key, snapshot_id, created_at_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, entity_id, file_id, schema_key, snapshot_id, now_ms],
            )?;

            if let Some(parent) = &parent {
                tx.execute(
                    "INSERT INTO change_edges(parent_id, child_id) VALUES (?1, ?2)",
                    params![parent.id, id],
                )?;
            }

            changes.push(Change {
                id,
                entity_id,
                file_id,
                schema_key,
                snapshot_id,
                created_at_ms: now_ms,
            });
        }

        let seq = next_counter_tx(&tx, "change_set_seq")?;
        let change_set_id = format!("cs_{seq:016}");
        tx.execute(
            "INSERT INTO change_sets(id, parent_id, created_at_ms) VALUES (?1, ?2, ?3)",
            params![change_set_id, state.head_change_set_id, now_ms],
        )?;
        for change in &changes {
            tx.execute(
                "INSERT INTO change_set_elements(change_set_id, change_id) VALUES (?1, ?2)",
                params![change_set_id, change.id],
            )?;
        }

        let updated_at_ms = state.updated_at_ms.max(now_ms);
        tx.execute(
            "UPDATE branches SET head_change_set_id=?2, updated_at_ms=?3 WHERE name=?1",
            params![branch, change_set_id, updated_at_ms],
        )?;

        tx.commit()?;
        Ok(CommittedChangeSet {
            change_set: ChangeSet {
                id: change_set_id,
                parent_id: state.head_change_set_id,
                created_at_ms: now_ms,
            },
            changes,
        })
    }

    pub fn change_set_get(&self, id: &str) -> Result<ChangeSet, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, parent_id, created_at_ms FROM change_sets WHERE id=?1",
                params![id],
                |row| {
                    Ok(ChangeSet {
                        id: row.get(0)?,
                        parent_id: row.get(1)?,
                        created_at_ms: row.get(2)?,
                    })
                },
            )
            .optional()?;
        row.ok_or(StoreError::UnknownChangeSet)
    }

    /// Member changes of a changeset, in insertion order.
    pub fn change_set_changes(&self, id: &str) -> Result<Vec<Change>, StoreError> {
        self.change_set_get(id)?;
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.entity_id, c.file_id, c.schema_key, c.snapshot_id, c.created_at_ms \
             FROM change_set_elements e JOIN changes c ON c.id = e.change_id \
             WHERE e.change_set_id=?1 \
             ORDER BY c.id ASC",
        )?;
        let mut rows = stmt.query(params![id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(change_from_row(row)?);
        }
        Ok(out)
    }
}
