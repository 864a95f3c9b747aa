#![forbid(unsafe_code)]

use super::*;

impl SqliteStore {
    /// Registers a file for tracking. Re-tracking an existing id updates the
    /// path and schema key but keeps the stored blobs.
    pub fn track_file(&mut self, id: &str, path: &str, schema_key: &str) -> Result<(), StoreError> {
        let id = canonicalize_file(id)?;
        let schema_key = canonicalize_schema(schema_key)?;
        if path.trim().is_empty() {
            return Err(StoreError::InvalidInput("path must not be empty"));
        }

        self.conn.execute(
            r#"
            INSERT INTO files(id, path, schema_key, data, diffed_data, updated_at_ms)
            VALUES (?1, ?2, ?3, NULL, NULL, ?4)
            ON CONFLICT(id) DO UPDATE SET
              path=excluded.path,
              schema_key=excluded.schema_key,
              updated_at_ms=excluded.updated_at_ms
            "#,
            params![id, path, schema_key, now_ms()],
        )?;
        Ok(())
    }

    pub fn write_file_blob(&mut self, id: &str, data: &[u8]) -> Result<(), StoreError> {
        let id = canonicalize_file(id)?;
        let updated = self.conn.execute(
            "UPDATE files SET data=?2, updated_at_ms=?3 WHERE id=?1",
            params![id, data, now_ms()],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownFile);
        }
        Ok(())
    }

    pub fn delete_file_blob(&mut self, id: &str) -> Result<(), StoreError> {
        let id = canonicalize_file(id)?;
        let updated = self.conn.execute(
            "UPDATE files SET data=NULL, updated_at_ms=?2 WHERE id=?1",
            params![id, now_ms()],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownFile);
        }
        Ok(())
    }

    /// Advances the last-diffed blob pointer after a pass committed.
    pub fn mark_diffed(&mut self, id: &str, data: Option<&[u8]>) -> Result<(), StoreError> {
        let id = canonicalize_file(id)?;
        let updated = self.conn.execute(
            "UPDATE files SET diffed_data=?2 WHERE id=?1",
            params![id, data],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownFile);
        }
        Ok(())
    }

    pub fn file_get(&self, id: &str) -> Result<TrackedFile, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, path, schema_key, data, diffed_data, updated_at_ms \
                 FROM files WHERE id=?1",
                params![id],
                file_from_row,
            )
            .optional()?;
        row.ok_or(StoreError::UnknownFile)
    }

    pub fn list_files(&self) -> Result<Vec<TrackedFile>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, path, schema_key, data, diffed_data, updated_at_ms \
             FROM files ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(file_from_row(row)?);
        }
        Ok(out)
    }

    /// Files whose stored blob differs from the blob last diffed. Used to
    /// re-mark dirtiness after a restart.
    pub fn undiffed_files(&self) -> Result<Vec<TrackedFile>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, path, schema_key, data, diffed_data, updated_at_ms \
             FROM files \
             WHERE (data IS NOT NULL AND (diffed_data IS NULL OR diffed_data != data)) \
                OR (data IS NULL AND diffed_data IS NOT NULL) \
             ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(file_from_row(row)?);
        }
        Ok(out)
    }
}

fn file_from_row(row: &rusqlite::Row<'_>) -> Result<TrackedFile, rusqlite::Error> {
    Ok(TrackedFile {
        id: row.get(0)?,
        path: row.get(1)?,
        schema_key: row.get(2)?,
        data: row.get(3)?,
        diffed_data: row.get(4)?,
        updated_at_ms: row.get(5)?,
    })
}
