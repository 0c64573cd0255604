//! Immutable schema snapshot
//!
//! One fully built model of a database's tables, declared column types,
//! single-column primary keys and foreign keys. A snapshot is never mutated
//! after construction; invalidation always builds and publishes a new one.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use sqlrest_common::error::{Error, Result};

/// Column name to declared type, ordered by column name.
pub type ColumnMap = BTreeMap<String, String>;

/// A single-column foreign key: `table.column -> referenced_table.referenced_column`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

impl ForeignKey {
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            referenced_table: referenced_table.into(),
            referenced_column: referenced_column.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, ColumnMap>,
    primary_keys: BTreeMap<String, String>,
    foreign_keys: BTreeSet<ForeignKey>,
}

impl SchemaSnapshot {
    /// Build a snapshot, checking that every primary key and every foreign
    /// key endpoint names a known table and column.
    pub fn new(
        tables: BTreeMap<String, ColumnMap>,
        primary_keys: BTreeMap<String, String>,
        foreign_keys: BTreeSet<ForeignKey>,
    ) -> Result<Self> {
        let snapshot = Self {
            tables,
            primary_keys,
            foreign_keys,
        };
        snapshot.check_invariants()?;
        Ok(snapshot)
    }

    #[must_use]
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    fn check_invariants(&self) -> Result<()> {
        for (table, pk) in &self.primary_keys {
            if !self.has_column(table, pk) {
                return Err(Error::InvalidSnapshot(format!(
                    "primary key {table}.{pk} does not name a known column"
                )));
            }
        }

        for fk in &self.foreign_keys {
            if !self.has_column(&fk.table, &fk.column) {
                return Err(Error::InvalidSnapshot(format!(
                    "foreign key column {}.{} does not exist",
                    fk.table, fk.column
                )));
            }
            if !self.has_table(&fk.referenced_table) {
                return Err(Error::InvalidSnapshot(format!(
                    "foreign key {}.{} references unknown table {}",
                    fk.table, fk.column, fk.referenced_table
                )));
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    #[must_use]
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|columns| columns.contains_key(column))
    }

    /// Declared columns of a table, ordered by name
    #[must_use]
    pub fn columns(&self, table: &str) -> Option<&ColumnMap> {
        self.tables.get(table)
    }

    #[must_use]
    pub fn column_type(&self, table: &str, column: &str) -> Option<&str> {
        self.tables
            .get(table)
            .and_then(|columns| columns.get(column))
            .map(String::as_str)
    }

    #[must_use]
    pub fn primary_key(&self, table: &str) -> Option<&str> {
        self.primary_keys.get(table).map(String::as_str)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ForeignKey> {
        self.foreign_keys.iter()
    }

    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Serialize for the persisted cache artifact
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::SnapshotEncoding(e.to_string()))
    }

    /// Restore a persisted snapshot. The invariants are re-checked so a
    /// hand-edited or truncated artifact is rejected instead of published.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self =
            bincode::deserialize(bytes).map_err(|e| Error::SnapshotEncoding(e.to_string()))?;
        snapshot.check_invariants()?;
        Ok(snapshot)
    }
}

/// Incremental construction of a [`SchemaSnapshot`]
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    tables: BTreeMap<String, ColumnMap>,
    primary_keys: BTreeMap<String, String>,
    foreign_keys: BTreeSet<ForeignKey>,
}

impl SnapshotBuilder {
    /// Add (or extend) a table with `(column, declared type)` pairs
    #[must_use]
    pub fn table(mut self, name: &str, columns: &[(&str, &str)]) -> Self {
        let entry = self.tables.entry(name.to_string()).or_default();
        for (column, declared) in columns {
            entry.insert((*column).to_string(), (*declared).to_string());
        }
        self
    }

    pub fn column(&mut self, table: &str, column: &str, declared: &str) -> &mut Self {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string(), declared.to_string());
        self
    }

    #[must_use]
    pub fn primary_key(mut self, table: &str, column: &str) -> Self {
        self.set_primary_key(table, column);
        self
    }

    pub fn set_primary_key(&mut self, table: &str, column: &str) -> &mut Self {
        self.primary_keys
            .insert(table.to_string(), column.to_string());
        self
    }

    #[must_use]
    pub fn foreign_key(
        mut self,
        table: &str,
        column: &str,
        referenced_table: &str,
        referenced_column: &str,
    ) -> Self {
        self.add_foreign_key(ForeignKey::new(
            table,
            column,
            referenced_table,
            referenced_column,
        ));
        self
    }

    pub fn add_foreign_key(&mut self, fk: ForeignKey) -> &mut Self {
        self.foreign_keys.insert(fk);
        self
    }

    pub fn build(self) -> Result<SchemaSnapshot> {
        SchemaSnapshot::new(self.tables, self.primary_keys, self.foreign_keys)
    }
}
