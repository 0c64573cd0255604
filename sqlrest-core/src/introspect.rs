//! Builds a [`SchemaSnapshot`] from raw store metadata

use std::collections::BTreeMap;

use tracing::{debug, warn};

use sqlrest_common::error::Result;

use crate::schema::{ForeignKey, SchemaSnapshot};
use crate::store::{RawSchema, Store};

/// Introspect `store` and build a snapshot from what it reports.
pub fn introspect(store: &dyn Store) -> Result<SchemaSnapshot> {
    let raw = store.introspect()?;
    build_snapshot(&raw)
}

fn is_internal(table: &str) -> bool {
    table.to_ascii_lowercase().starts_with("sqlite_")
}

/// Turn raw metadata into a snapshot.
///
/// Rows that cannot be represented are skipped rather than failing the build:
/// internal tables, composite primary keys, self-referencing foreign keys and
/// foreign keys whose endpoints are unknown.
pub fn build_snapshot(raw: &RawSchema) -> Result<SchemaSnapshot> {
    let mut builder = SchemaSnapshot::builder();
    let mut pk_columns: BTreeMap<&str, Vec<(i64, &str)>> = BTreeMap::new();

    for column in raw.columns.iter().filter(|c| !is_internal(&c.table)) {
        builder.column(&column.table, &column.name, &column.declared_type);
        if column.primary_key_position > 0 {
            pk_columns
                .entry(column.table.as_str())
                .or_default()
                .push((column.primary_key_position, column.name.as_str()));
        }
    }

    let mut primary_keys: BTreeMap<&str, &str> = BTreeMap::new();
    for (table, columns) in pk_columns {
        match columns.as_slice() {
            [(_, column)] => {
                builder.set_primary_key(table, column);
                primary_keys.insert(table, *column);
            }
            _ => warn!(
                table,
                columns = columns.len(),
                "Composite primary key is not supported, table has no primary key"
            ),
        }
    }

    let known: BTreeMap<&str, Vec<&str>> = raw
        .columns
        .iter()
        .filter(|c| !is_internal(&c.table))
        .fold(BTreeMap::new(), |mut acc, c| {
            acc.entry(c.table.as_str()).or_default().push(c.name.as_str());
            acc
        });
    let has_column = |table: &str, column: &str| {
        known.get(table).is_some_and(|cols| cols.contains(&column))
    };

    let mut foreign_keys = 0usize;
    for fk in &raw.foreign_keys {
        if is_internal(&fk.table) || fk.table == fk.referenced_table {
            continue;
        }
        if !has_column(&fk.table, &fk.column) {
            warn!(table = %fk.table, column = %fk.column, "Skipping foreign key on unknown column");
            continue;
        }
        if !known.contains_key(fk.referenced_table.as_str()) {
            warn!(
                table = %fk.table,
                column = %fk.column,
                referenced_table = %fk.referenced_table,
                "Skipping foreign key to unknown table"
            );
            continue;
        }

        let referenced_column = match fk.referenced_column.as_deref() {
            Some(column) if !column.is_empty() => column,
            _ => match primary_keys.get(fk.referenced_table.as_str()).copied() {
                Some(pk) => pk,
                None => {
                    warn!(
                        table = %fk.table,
                        column = %fk.column,
                        referenced_table = %fk.referenced_table,
                        "Skipping foreign key to a table without a primary key"
                    );
                    continue;
                }
            },
        };

        builder.add_foreign_key(ForeignKey::new(
            fk.table.as_str(),
            fk.column.as_str(),
            fk.referenced_table.as_str(),
            referenced_column,
        ));
        foreign_keys += 1;
    }

    let snapshot = builder.build()?;
    debug!(
        tables = snapshot.table_count(),
        foreign_keys, "Built schema snapshot"
    );
    Ok(snapshot)
}
