#![forbid(unsafe_code)]

use fl_core::diff::{DiffError, DiffMeta, DiffOperation, DiffPlugin, DiffReport, classify};
use fl_core::ids::{IdentError, SchemaKey};
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::types::ValueRef;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// One declared entity type: a table inside the embedded database, keyed by
/// a single stable primary-key column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub key_column: String,
}

/// Generic diff plugin over an embedded relational blob: opens both versions
/// read-only, enumerates the declared tables in declaration order and diffs
/// rows by primary key. Entity ids are `"<table>|<key>"`.
pub struct TableDiffPlugin {
    schema_key: String,
    tables: Vec<TableSpec>,
}

impl TableDiffPlugin {
    pub fn new(
        schema_key: impl Into<String>,
        tables: Vec<TableSpec>,
    ) -> Result<Self, IdentError> {
        let schema_key = SchemaKey::try_new(schema_key)?.into_string();
        for table in &tables {
            SchemaKey::try_new(table.name.as_str())?;
            SchemaKey::try_new(table.key_column.as_str())?;
        }
        Ok(Self { schema_key, tables })
    }
}

impl DiffPlugin for TableDiffPlugin {
    fn schema_key(&self) -> &str {
        &self.schema_key
    }

    fn entity_types(&self) -> Vec<String> {
        self.tables.iter().map(|table| table.name.clone()).collect()
    }

    fn diff_file(
        &self,
        old: Option<&[u8]>,
        neu: Option<&[u8]>,
    ) -> Result<Vec<DiffReport>, DiffError> {
        if old.is_none() && neu.is_none() {
            return Err(DiffError::Plugin(
                "at most one of old/neu may be absent".to_string(),
            ));
        }

        let old_tables = match old {
            Some(bytes) => read_tables(bytes, &self.tables)?,
            None => empty_tables(&self.tables),
        };
        let neu_tables = match neu {
            Some(bytes) => read_tables(bytes, &self.tables)?,
            None => empty_tables(&self.tables),
        };

        let mut reports = Vec::new();
        for (index, table) in self.tables.iter().enumerate() {
            let old_rows = &old_tables[index];
            let neu_rows = &neu_tables[index];

            // Union of keys in sorted order keeps report order reproducible.
            let mut keys: Vec<&String> = old_rows.keys().collect();
            for key in neu_rows.keys() {
                if !old_rows.contains_key(key) {
                    keys.push(key);
                }
            }
            keys.sort();

            for key in keys {
                let old_row = old_rows.get(key);
                let neu_row = neu_rows.get(key);
                let Some(operation) = classify(old_row, neu_row) else {
                    continue;
                };
                reports.push(DiffReport {
                    entity_type: table.name.clone(),
                    operation,
                    old: if operation == DiffOperation::Create {
                        None
                    } else {
                        old_row.cloned()
                    },
                    neu: if operation == DiffOperation::Delete {
                        None
                    } else {
                        neu_row.cloned()
                    },
                    meta: Some(DiffMeta {
                        id: format!("{}|{}", table.name, key),
                    }),
                });
            }
        }

        Ok(reports)
    }
}

fn empty_tables(tables: &[TableSpec]) -> Vec<BTreeMap<String, Value>> {
    tables.iter().map(|_| BTreeMap::new()).collect()
}

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Reads every declared table of the blob into key-indexed JSON rows. The
/// blob is written to a scratch file and opened read-only; an unreadable
/// database surfaces `Malformed`.
fn read_tables(
    bytes: &[u8],
    tables: &[TableSpec],
) -> Result<Vec<BTreeMap<String, Value>>, DiffError> {
    let scratch = std::env::temp_dir().join(format!(
        "fl_rows_{}_{}.sqlite",
        std::process::id(),
        SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&scratch, bytes)
        .map_err(|err| DiffError::Plugin(format!("scratch write failed: {err}")))?;

    let result = read_tables_from(&scratch, tables);
    let _ = std::fs::remove_file(&scratch);
    result
}

fn read_tables_from(
    path: &std::path::Path,
    tables: &[TableSpec],
) -> Result<Vec<BTreeMap<String, Value>>, DiffError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|err| DiffError::Malformed(err.to_string()))?;

    let mut out = Vec::with_capacity(tables.len());
    for table in tables {
        out.push(read_table(&conn, table)?);
    }
    Ok(out)
}

fn read_table(
    conn: &Connection,
    table: &TableSpec,
) -> Result<BTreeMap<String, Value>, DiffError> {
    // Table and column names were validated against the identifier alphabet
    // at construction, so interpolation is safe here.
    let sql = format!("SELECT * FROM \"{}\"", table.name);
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|err| DiffError::Malformed(err.to_string()))?;
    let column_names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();

    let mut rows = stmt
        .query([])
        .map_err(|err| DiffError::Malformed(err.to_string()))?;
    let mut out = BTreeMap::new();
    while let Some(row) = rows
        .next()
        .map_err(|err| DiffError::Malformed(err.to_string()))?
    {
        let mut object = Map::new();
        for (index, name) in column_names.iter().enumerate() {
            let value = row
                .get_ref(index)
                .map_err(|err| DiffError::Malformed(err.to_string()))?;
            object.insert(name.clone(), json_value(value, name, &table.name)?);
        }

        let key = match object.get(table.key_column.as_str()) {
            Some(Value::String(key)) => key.clone(),
            Some(Value::Number(key)) => key.to_string(),
            _ => {
                return Err(DiffError::Malformed(format!(
                    "table {} has no usable key column {}",
                    table.name, table.key_column
                )));
            }
        };
        out.insert(key, Value::Object(object));
    }
    Ok(out)
}

fn json_value(value: ValueRef<'_>, column: &str, table: &str) -> Result<Value, DiffError> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(value) => Ok(Value::Number(Number::from(value))),
        ValueRef::Real(value) => Number::from_f64(value)
            .map(Value::Number)
            .ok_or_else(|| DiffError::Malformed(format!("non-finite real in {table}.{column}"))),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|text| Value::String(text.to_string()))
            .map_err(|_| DiffError::Malformed(format!("non-utf8 text in {table}.{column}"))),
        ValueRef::Blob(_) => Err(DiffError::Malformed(format!(
            "blob column {table}.{column} is not diffable"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blob_with_rows(rows: &[(&str, Option<&str>)]) -> Vec<u8> {
        let scratch = std::env::temp_dir().join(format!(
            "fl_rows_test_{}_{}.sqlite",
            std::process::id(),
            SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let conn = Connection::open(&scratch).expect("open scratch");
        conn.execute_batch("CREATE TABLE bundle (id TEXT PRIMARY KEY, alias TEXT);")
            .expect("create table");
        for (id, alias) in rows {
            conn.execute(
                "INSERT INTO bundle(id, alias) VALUES (?1, ?2)",
                rusqlite::params![id, alias],
            )
            .expect("insert row");
        }
        drop(conn);
        let bytes = std::fs::read(&scratch).expect("read scratch");
        let _ = std::fs::remove_file(&scratch);
        bytes
    }

    fn bundle_plugin() -> TableDiffPlugin {
        TableDiffPlugin::new(
            "table_rows",
            vec![TableSpec {
                name: "bundle".to_string(),
                key_column: "id".to_string(),
            }],
        )
        .expect("plugin")
    }

    #[test]
    fn insert_into_empty_file_reports_create() {
        let plugin = bundle_plugin();
        let neu = blob_with_rows(&[("1", None)]);
        let reports = plugin.diff_file(None, Some(&neu)).expect("diff");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].entity_type, "bundle");
        assert_eq!(reports[0].operation, DiffOperation::Create);
        assert_eq!(reports[0].old, None);
        assert_eq!(reports[0].neu, Some(json!({"id": "1", "alias": null})));
        assert_eq!(
            reports[0].meta.as_ref().map(|meta| meta.id.as_str()),
            Some("bundle|1")
        );
    }

    #[test]
    fn identical_blobs_diff_to_nothing() {
        let plugin = bundle_plugin();
        let blob = blob_with_rows(&[("1", Some("greeting"))]);
        let reports = plugin.diff_file(Some(&blob), Some(&blob)).expect("diff");
        assert!(reports.is_empty());
    }

    #[test]
    fn update_and_delete_are_classified() {
        let plugin = bundle_plugin();
        let old = blob_with_rows(&[("1", Some("greeting")), ("2", None)]);
        let neu = blob_with_rows(&[("1", Some("farewell"))]);
        let reports = plugin.diff_file(Some(&old), Some(&neu)).expect("diff");
        assert_eq!(reports.len(), 2);

        assert_eq!(reports[0].operation, DiffOperation::Update);
        assert_eq!(reports[0].old, Some(json!({"id": "1", "alias": "greeting"})));
        assert_eq!(reports[0].neu, Some(json!({"id": "1", "alias": "farewell"})));

        assert_eq!(reports[1].operation, DiffOperation::Delete);
        assert_eq!(reports[1].old, Some(json!({"id": "2", "alias": null})));
        assert_eq!(reports[1].neu, None);
    }

    #[test]
    fn malformed_blob_is_rejected() {
        let plugin = bundle_plugin();
        let garbage = b"this is not a database".to_vec();
        let err = plugin.diff_file(None, Some(&garbage)).unwrap_err();
        assert!(matches!(err, DiffError::Malformed(_)));
    }

    #[test]
    fn invalid_table_name_is_rejected_at_construction() {
        let result = TableDiffPlugin::new(
            "table_rows",
            vec![TableSpec {
                name: "bad name".to_string(),
                key_column: "id".to_string(),
            }],
        );
        assert!(result.is_err());
    }
}
