#![forbid(unsafe_code)]

use super::*;
use serde_json::Value;
use std::collections::VecDeque;

impl SqliteStore {
    pub fn change_get(&self, id: &str) -> Result<Change, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, entity_id, file_id, schema_key, snapshot_id, created_at_ms \
                 FROM changes WHERE id=?1",
                params![id],
                change_from_row,
            )
            .optional()?;
        row.ok_or(StoreError::UnknownChange)
    }

    /// Most recent change for the entity reachable from the branch head,
    /// including deletion markers. `None` if the entity was never created on
    /// that path.
    pub fn entity_head(&mut self, entity_id: &str, branch: &str) -> Result<Option<Change>, StoreError> {
        let entity_id = canonicalize_entity(entity_id)?;
        let branch = canonicalize_branch(branch)?;
        let tx = self.conn.transaction()?;
        let state = branch_state_tx(&tx, &branch)?;
        let head = entity_head_tx(&tx, &entity_id, state.head_change_set_id.as_deref())?;
        tx.commit()?;
        Ok(head)
    }

    /// Branch-scoped current value. Deletion markers and never-created
    /// entities both resolve to `None`.
    pub fn entity_state(&mut self, entity_id: &str, branch: &str) -> Result<Option<Value>, StoreError> {
        let Some(head) = self.entity_head(entity_id, branch)? else {
            return Ok(None);
        };
        self.snapshot_get(&head.snapshot_id)
    }

    /// Unscoped head lookup: the single leaf of the entity's causal DAG.
    /// More than one leaf means the caller must add branch scoping.
    pub fn unscoped_head(&self, entity_id: &str) -> Result<Option<Change>, StoreError> {
        let entity_id = canonicalize_entity(entity_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.entity_id, c.file_id, c.schema_key, c.snapshot_id, c.created_at_ms \
             FROM changes c \
             WHERE c.entity_id=?1 \
               AND NOT EXISTS (SELECT 1 FROM change_edges e WHERE e.parent_id = c.id) \
             ORDER BY c.id ASC",
        )?;
        let mut rows = stmt.query(params![entity_id])?;
        let mut leaves = Vec::new();
        while let Some(row) = rows.next()? {
            leaves.push(change_from_row(row)?);
        }

        match leaves.len() {
            0 => Ok(None),
            1 => Ok(leaves.pop()),
            _ => Err(StoreError::AmbiguousHead {
                entity_id,
                candidates: leaves.into_iter().map(|change| change.id).collect(),
            }),
        }
    }

    /// Finite breadth-first walk over parent edges, nearest ancestors first.
    /// The starting change is not included.
    pub fn ancestors_of(&self, change_id: &str) -> Result<Vec<Change>, StoreError> {
        self.change_get(change_id)?;

        let mut out = Vec::new();
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
                if seen.insert(parent.id.clone()) {
                    queue.push_back(parent.id.clone());
                    out.push(parent);
                }
            }
        }

        Ok(out)
    }
}
