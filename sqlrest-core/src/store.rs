//! Store integration
//!
//! The compiler never talks to a storage engine directly. Anything that can
//! run a parameterized statement and describe its own schema implements
//! [`Store`]; the default [`Store::introspect`] reads SQLite metadata through
//! `execute`, so most engines only need to provide that one method.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use sqlrest_common::error::{Error, Result};
use sqlrest_common::types::{Row, Value};

/// Every column of every table with its declared type and primary key position
const COLUMNS_QUERY: &str = r#"SELECT m.name AS "table", l.name AS "name", l.type AS "type", l.pk AS "pk"
FROM sqlite_master m
JOIN pragma_table_info(m.name) l
WHERE m.type = 'table'
ORDER BY m.name, l.cid"#;

/// Every foreign key between two different tables
const FOREIGN_KEYS_QUERY: &str = r#"SELECT m.name AS "table", f."from" AS "column", f."table" AS "referenced_table", f."to" AS "referenced_column"
FROM sqlite_master m
JOIN pragma_foreign_key_list(m.name) f ON m.name != f."table"
WHERE m.type = 'table'
ORDER BY m.name, f.id"#;

/// One row of column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawColumn {
    pub table: String,
    pub name: String,
    #[serde(default)]
    pub declared_type: String,
    /// 1-based position within the primary key, 0 when not part of it
    #[serde(default)]
    pub primary_key_position: i64,
}

/// One row of foreign key metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawForeignKey {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    /// Absent when the key implicitly references the primary key
    #[serde(default)]
    pub referenced_column: Option<String>,
}

/// Unprocessed metadata as reported by a store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSchema {
    #[serde(default)]
    pub columns: Vec<RawColumn>,
    #[serde(default)]
    pub foreign_keys: Vec<RawForeignKey>,
}

impl RawSchema {
    /// Add a column, returning `self` for chaining
    #[must_use]
    pub fn column(mut self, table: &str, name: &str, declared_type: &str, pk: i64) -> Self {
        self.columns.push(RawColumn {
            table: table.to_string(),
            name: name.to_string(),
            declared_type: declared_type.to_string(),
            primary_key_position: pk,
        });
        self
    }

    #[must_use]
    pub fn foreign_key(
        mut self,
        table: &str,
        column: &str,
        referenced_table: &str,
        referenced_column: Option<&str>,
    ) -> Self {
        self.foreign_keys.push(RawForeignKey {
            table: table.to_string(),
            column: column.to_string(),
            referenced_table: referenced_table.to_string(),
            referenced_column: referenced_column.map(str::to_string),
        });
        self
    }
}

/// Execution collaborator for compiled statements
pub trait Store: Send + Sync {
    /// Run one statement with positional arguments and return its rows.
    ///
    /// Failures are reported as [`Error::StoreExecution`] and are passed to
    /// the caller untouched.
    fn execute(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>>;

    /// Describe the store's tables, columns and foreign keys.
    fn introspect(&self) -> Result<RawSchema> {
        let columns = self
            .execute(COLUMNS_QUERY, &[])?
            .iter()
            .map(|row| {
                Ok(RawColumn {
                    table: text_field(row, "table")?,
                    name: text_field(row, "name")?,
                    declared_type: row
                        .get("type")
                        .and_then(Value::as_text)
                        .unwrap_or_default()
                        .to_string(),
                    primary_key_position: row.get("pk").and_then(Value::as_i64).unwrap_or(0),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let foreign_keys = self
            .execute(FOREIGN_KEYS_QUERY, &[])?
            .iter()
            .map(|row| {
                Ok(RawForeignKey {
                    table: text_field(row, "table")?,
                    column: text_field(row, "column")?,
                    referenced_table: text_field(row, "referenced_table")?,
                    referenced_column: row
                        .get("referenced_column")
                        .and_then(Value::as_text)
                        .map(str::to_string),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RawSchema {
            columns,
            foreign_keys,
        })
    }
}

fn text_field(row: &Row, name: &str) -> Result<String> {
    row.get(name)
        .and_then(Value::as_text)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::StoreExecution(format!("introspection row is missing text column {name}"))
        })
}

/// A statement received by a [`MemoryStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    pub sql: String,
    pub args: Vec<Value>,
}

/// In-memory store that serves a fixed schema and records every statement.
///
/// Queued responses are returned in order by `execute`; once the queue is
/// empty every statement yields no rows. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    schema: Mutex<RawSchema>,
    responses: Mutex<VecDeque<Result<Vec<Row>>>>,
    statements: Mutex<Vec<RecordedStatement>>,
    fail_introspection: Mutex<Option<String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(schema: RawSchema) -> Self {
        Self {
            schema: Mutex::new(schema),
            ..Self::default()
        }
    }

    /// Replace the schema reported by the next introspection
    pub fn set_schema(&self, schema: RawSchema) {
        *self.schema.lock() = schema;
    }

    /// Queue the rows returned by the next unanswered `execute`
    pub fn push_response(&self, rows: Vec<Row>) {
        self.responses.lock().push_back(Ok(rows));
    }

    /// Queue a store failure for the next unanswered `execute`
    pub fn push_failure(&self, message: &str) {
        self.responses
            .lock()
            .push_back(Err(Error::StoreExecution(message.to_string())));
    }

    /// Make the next introspection fail with `message`
    pub fn fail_next_introspection(&self, message: &str) {
        *self.fail_introspection.lock() = Some(message.to_string());
    }

    /// Every statement executed so far
    #[must_use]
    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.statements.lock().clone()
    }
}

impl Store for MemoryStore {
    fn execute(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        self.statements.lock().push(RecordedStatement {
            sql: sql.to_string(),
            args: args.to_vec(),
        });
        self.responses.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn introspect(&self) -> Result<RawSchema> {
        if let Some(message) = self.fail_introspection.lock().take() {
            return Err(Error::StoreExecution(message));
        }
        Ok(self.schema.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers the two metadata queries like SQLite would
    struct MetadataStore;

    impl Store for MetadataStore {
        fn execute(&self, sql: &str, _args: &[Value]) -> Result<Vec<Row>> {
            if sql.contains("pragma_table_info") {
                Ok(vec![
                    [
                        ("table", Value::from("users")),
                        ("name", Value::from("id")),
                        ("type", Value::from("INTEGER")),
                        ("pk", Value::Integer(1)),
                    ]
                    .into_iter()
                    .collect(),
                    [
                        ("table", Value::from("cars")),
                        ("name", Value::from("user_id")),
                        ("type", Value::Null),
                        ("pk", Value::Integer(0)),
                    ]
                    .into_iter()
                    .collect(),
                ])
            } else if sql.contains("pragma_foreign_key_list") {
                Ok(vec![[
                    ("table", Value::from("cars")),
                    ("column", Value::from("user_id")),
                    ("referenced_table", Value::from("users")),
                    ("referenced_column", Value::Null),
                ]
                .into_iter()
                .collect()])
            } else {
                Err(Error::StoreExecution(format!("unexpected statement {sql}")))
            }
        }
    }

    #[test]
    fn test_default_introspection_decodes_metadata() {
        let raw = MetadataStore.introspect().unwrap();
        assert_eq!(
            raw,
            RawSchema::default()
                .column("users", "id", "INTEGER", 1)
                .column("cars", "user_id", "", 0)
                .foreign_key("cars", "user_id", "users", None)
        );
    }

    #[test]
    fn test_introspection_rejects_incomplete_rows() {
        struct Broken;
        impl Store for Broken {
            fn execute(&self, _sql: &str, _args: &[Value]) -> Result<Vec<Row>> {
                Ok(vec![[("table", Value::Integer(3))].into_iter().collect()])
            }
        }
        assert!(matches!(
            Broken.introspect(),
            Err(Error::StoreExecution(_))
        ));
    }

    #[test]
    fn test_memory_store_records_and_replays() {
        let store = MemoryStore::default();
        store.push_response(vec![[("n", Value::Integer(1))].into_iter().collect()]);
        store.push_failure("disk full");

        let rows = store.execute("SELECT 1", &[]).unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Integer(1)));
        assert!(matches!(
            store.execute("SELECT ?", &[Value::from("x")]),
            Err(Error::StoreExecution(msg)) if msg == "disk full"
        ));
        assert!(store.execute("SELECT 2", &[]).unwrap().is_empty());

        let statements = store.statements();
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[1].args, vec![Value::from("x")]);
    }

    #[test]
    fn test_memory_store_introspection_failure_is_one_shot() {
        let store = MemoryStore::new(RawSchema::default().column("t", "id", "INTEGER", 1));
        store.fail_next_introspection("locked");
        assert!(store.introspect().is_err());
        assert_eq!(store.introspect().unwrap().columns.len(), 1);
    }
}
