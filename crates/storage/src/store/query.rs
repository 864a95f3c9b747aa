#![forbid(unsafe_code)]

use super::*;
use std::collections::HashSet;

impl SqliteStore {
    /// Generic relational filtering over the change table. Filters compose
    /// conjunctively; results are ordered newest first.
    pub fn list_changes(&mut self, query: &ChangeQuery) -> Result<Vec<Change>, StoreError> {
        let reachable = match query.branch.as_deref() {
            Some(branch) => Some(self.branch_reachable_change_ids(branch)?),
            None => None,
        };

        let mut sql = String::from(
            "SELECT DISTINCT c.id, c.entity_id, c.file_id, c.schema_key, c.snapshot_id, c.created_at_ms \
             FROM changes c",
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(label) = &query.label {
            sql.push_str(" JOIN change_labels l ON l.change_id = c.id AND l.label = ?");
            params_vec.push(Box::new(label.clone()));
        }

        sql.push_str(" WHERE 1=1");
        if let Some(entity_id) = &query.entity_id {
            sql.push_str(" AND c.entity_id = ?");
            params_vec.push(Box::new(canonicalize_entity(entity_id)?));
        }
        if let Some(file_id) = &query.file_id {
            sql.push_str(" AND c.file_id = ?");
            params_vec.push(Box::new(canonicalize_file(file_id)?));
        }
        if let Some(schema_key) = &query.schema_key {
            sql.push_str(" AND c.schema_key = ?");
            params_vec.push(Box::new(canonicalize_schema(schema_key)?));
        }
        sql.push_str(" ORDER BY c.created_at_ms DESC, c.id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(
            params_vec.iter().map(|p| p.as_ref()),
        ))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let change = change_from_row(row)?;
            if let Some(reachable) = &reachable {
                if !reachable.contains(&change.id) {
                    continue;
                }
            }
            out.push(change);
        }
        Ok(out)
    }

    /// Change ids reachable from the branch head through the changeset spine.
    pub fn branch_reachable_change_ids(&mut self, branch: &str) -> Result<HashSet<String>, StoreError> {
        let branch = canonicalize_branch(branch)?;
        let tx = self.conn.transaction()?;
        let state = branch_state_tx(&tx, &branch)?;
        let change_sets = visible_change_sets_tx(&tx, state.head_change_set_id.as_deref())?;

        let mut out = HashSet::new();
        for change_set_id in change_sets {
            let mut stmt = tx.prepare(
                "SELECT change_id FROM change_set_elements WHERE change_set_id=?1",
            )?;
            let mut rows = stmt.query(params![change_set_id])?;
            while let Some(row) = rows.next()? {
                out.insert(row.get::<_, String>(0)?);
            }
        }
        drop(tx);
        Ok(out)
    }
}
