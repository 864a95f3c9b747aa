#![forbid(unsafe_code)]

use super::*;

impl SqliteStore {
    /// Creates a branch pointing at the source branch's head. History is
    /// shared through the changeset spine, never copied.
    pub fn create_branch(&mut self, request: CreateBranchRequest) -> Result<Branch, StoreError> {
        let name = canonicalize_branch(&request.name)?;
        let from = request
            .from
            .as_deref()
            .map(canonicalize_branch)
            .transpose()?;

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let head_change_set_id = match from.as_deref() {
            Some(from) => branch_state_tx(&tx, from)?.head_change_set_id,
            None => None,
        };

        let insert = tx.execute(
            "INSERT INTO branches(name, head_change_set_id, created_at_ms, updated_at_ms) \
             VALUES (?1, ?2, ?3, ?3)",
            params![name, head_change_set_id, now_ms],
        );
        if let Err(err) = insert {
            return Err(map_insert_conflict(err));
        }

        tx.commit()?;
        Ok(Branch {
            name,
            head_change_set_id,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        })
    }

    /// Fast-forwards a branch to an existing changeset. The changeset's
    /// implied parent must match the branch's current head; otherwise the
    /// caller lost an optimistic race and must re-read and retry.
    pub fn advance_branch(&mut self, request: AdvanceBranchRequest) -> Result<Branch, StoreError> {
        let branch = canonicalize_branch(&request.branch)?;

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        let state = branch_state_tx(&tx, &branch)?;

        let parent_id = tx
            .query_row(
                "SELECT parent_id FROM change_sets WHERE id=?1",
                params![request.change_set_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .ok_or(StoreError::UnknownChangeSet)?;

        if parent_id != state.head_change_set_id {
            return Err(StoreError::StaleBranch {
                branch,
                expected: parent_id,
                actual: state.head_change_set_id,
            });
        }

        let created_at_ms = tx.query_row(
            "SELECT created_at_ms FROM branches WHERE name=?1",
            params![branch],
            |row| row.get::<_, i64>(0),
        )?;
        let updated_at_ms = state.updated_at_ms.max(now_ms);
        tx.execute(
            "UPDATE branches SET head_change_set_id=?2, updated_at_ms=?3 WHERE name=?1",
            params![branch, request.change_set_id, updated_at_ms],
        )?;

        tx.commit()?;
        Ok(Branch {
            name: branch,
            head_change_set_id: Some(request.change_set_id),
            created_at_ms,
            updated_at_ms,
        })
    }

    /// Removes the pointer only; history stays reachable from other branches.
    pub fn delete_branch(&mut self, name: &str) -> Result<(), StoreError> {
        let name = canonicalize_branch(name)?;
        let tx = self.conn.transaction()?;
        let deleted = tx.execute("DELETE FROM branches WHERE name=?1", params![name])?;
        if deleted == 0 {
            return Err(StoreError::UnknownBranch);
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_branches(&self) -> Result<Vec<Branch>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, head_change_set_id, created_at_ms, updated_at_ms \
             FROM branches ORDER BY created_at_ms ASC, name ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Branch {
                name: row.get(0)?,
                head_change_set_id: row.get(1)?,
                created_at_ms: row.get(2)?,
                updated_at_ms: row.get(3)?,
            });
        }
        Ok(out)
    }

    pub fn branch_head(&self, name: &str) -> Result<Option<String>, StoreError> {
        let name = canonicalize_branch(name)?;
        let row = self
            .conn
            .query_row(
                "SELECT head_change_set_id FROM branches WHERE name=?1",
                params![name],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        row.ok_or(StoreError::UnknownBranch)
    }
}
