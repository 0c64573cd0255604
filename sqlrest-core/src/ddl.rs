//! Table DDL compilation
//!
//! Create, alter and drop statements built from JSON column definitions.
//! Types and referential actions come from closed sets, defaults are
//! rendered as escaped literals, and every existing name is validated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use sqlrest_common::error::{Error, Result};

use crate::compiler::QueryCompiler;
use crate::scan::{split_raw, unquote, ScanError};
use crate::statement::CompiledStatement;
use crate::validate::{string_literal, Ident};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Blob,
}

impl ColumnType {
    pub fn parse(column: &str, declared: &str) -> Result<Self> {
        match declared.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "integer" => Ok(Self::Integer),
            "real" => Ok(Self::Real),
            "blob" => Ok(Self::Blob),
            _ => Err(Error::InvalidColumnType {
                column: column.to_string(),
                declared: declared.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn sql(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Blob => "BLOB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    NoAction,
    Restrict,
    SetNull,
    SetDefault,
    Cascade,
}

impl ReferentialAction {
    pub fn parse(action: &str) -> Result<Self> {
        match action.trim().to_ascii_lowercase().as_str() {
            "no action" => Ok(Self::NoAction),
            "restrict" => Ok(Self::Restrict),
            "set null" => Ok(Self::SetNull),
            "set default" => Ok(Self::SetDefault),
            "cascade" => Ok(Self::Cascade),
            _ => Err(Error::InvalidReferentialAction(action.to_string())),
        }
    }

    #[must_use]
    pub fn sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::Cascade => "CASCADE",
        }
    }
}

/// One column in a create or alter request body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColumnDefinition {
    #[serde(rename = "type")]
    pub column_type: String,
    pub default: Option<JsonValue>,
    pub primary_key: bool,
    pub unique: bool,
    pub not_null: bool,
    /// `table.column`
    pub references: Option<String>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

impl ColumnDefinition {
    #[must_use]
    pub fn new(column_type: &str) -> Self {
        Self {
            column_type: column_type.to_string(),
            ..Self::default()
        }
    }
}

/// Changes applied by an alter request, in this order: renamed columns,
/// dropped columns, new columns, then the table rename.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableChanges {
    pub rename_columns: BTreeMap<String, String>,
    pub drop_columns: Vec<String>,
    pub new_columns: BTreeMap<String, ColumnDefinition>,
    pub new_name: Option<String>,
}

impl TableChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rename_columns.is_empty()
            && self.drop_columns.is_empty()
            && self.new_columns.is_empty()
            && self.new_name.is_none()
    }
}

/// A validated foreign key target with its actions
struct Reference {
    table: Ident,
    column: Ident,
    on_delete: Option<ReferentialAction>,
    on_update: Option<ReferentialAction>,
}

impl Reference {
    fn render(&self) -> String {
        let mut sql = format!("REFERENCES {} ({})", self.table, self.column);
        if let Some(action) = self.on_delete {
            sql.push_str(" ON DELETE ");
            sql.push_str(action.sql());
        }
        if let Some(action) = self.on_update {
            sql.push_str(" ON UPDATE ");
            sql.push_str(action.sql());
        }
        sql
    }
}

fn default_literal(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => i64::from(*b).to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => string_literal(s),
        JsonValue::Array(_) | JsonValue::Object(_) => string_literal(&value.to_string()),
    }
}

/// `"name" TYPE [PRIMARY KEY] [UNIQUE] [NOT NULL] [DEFAULT ...]`
fn column_sql(name: &Ident, definition: &ColumnDefinition) -> Result<String> {
    let column_type = ColumnType::parse(name.as_str(), &definition.column_type)?;
    let mut sql = format!("{name} {}", column_type.sql());
    if definition.primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    if definition.unique {
        sql.push_str(" UNIQUE");
    }
    if definition.not_null {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &definition.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(&default_literal(default));
    }
    Ok(sql)
}

impl QueryCompiler<'_> {
    /// Split and validate a `table.column` reference. `pending` allows a
    /// new table to reference one of its own columns.
    fn reference(
        &self,
        column: &str,
        definition: &ColumnDefinition,
        pending: Option<(&Ident, &BTreeMap<String, ColumnDefinition>)>,
    ) -> Result<Option<Reference>> {
        let Some(target) = definition.references.as_deref() else {
            if definition.on_delete.is_some() || definition.on_update.is_some() {
                return Err(Error::InvalidBody(format!(
                    "column {column} has referential actions but no references"
                )));
            }
            return Ok(None);
        };

        let invalid = |_: ScanError| Error::InvalidBody(format!("references {target:?} must be table.column"));
        let parts = split_raw(target, '.').map_err(invalid)?;
        let [table, referenced] = parts.as_slice() else {
            return Err(Error::InvalidBody(format!(
                "references {target:?} must be table.column"
            )));
        };
        let table = unquote(table).map_err(invalid)?.text;
        let referenced = unquote(referenced).map_err(invalid)?.text;

        let (table, referenced) = match pending {
            Some((name, columns)) if name.as_str() == table => {
                if !columns.contains_key(&referenced) {
                    return Err(Error::unknown_column(&table, &referenced));
                }
                (name.clone(), Ident::declare(&referenced)?)
            }
            _ => (
                self.validator.validate_table(&table)?,
                self.validator.validate_column(&table, &referenced)?,
            ),
        };

        Ok(Some(Reference {
            table,
            column: referenced,
            on_delete: definition
                .on_delete
                .as_deref()
                .map(ReferentialAction::parse)
                .transpose()?,
            on_update: definition
                .on_update
                .as_deref()
                .map(ReferentialAction::parse)
                .transpose()?,
        }))
    }

    /// `CREATE TABLE` with one table-level foreign key per referencing column
    pub fn create_table(
        &self,
        table: &str,
        columns: &BTreeMap<String, ColumnDefinition>,
    ) -> Result<CompiledStatement> {
        let table = Ident::declare(table)?;
        if columns.is_empty() {
            return Err(Error::InvalidBody(format!(
                "table {} must have at least one column",
                table.as_str()
            )));
        }
        if columns.values().filter(|c| c.primary_key).count() > 1 {
            return Err(Error::InvalidBody(
                "composite primary keys are not supported".to_string(),
            ));
        }

        let mut definitions = Vec::with_capacity(columns.len());
        let mut foreign_keys = Vec::new();
        for (name, definition) in columns {
            let ident = Ident::declare(name)?;
            definitions.push(column_sql(&ident, definition)?);
            if let Some(reference) = self.reference(name, definition, Some((&table, columns)))? {
                foreign_keys.push(format!("FOREIGN KEY ({ident}) {}", reference.render()));
            }
        }
        definitions.extend(foreign_keys);

        Ok(CompiledStatement::without_args(format!(
            "CREATE TABLE {table} ({})",
            definitions.join(", ")
        )))
    }

    /// One `ALTER TABLE` statement per change
    pub fn alter_table(&self, table: &str, changes: &TableChanges) -> Result<Vec<CompiledStatement>> {
        let table = self.validator.validate_table(table)?;
        if changes.is_empty() {
            return Err(Error::InvalidBody("alter request has no changes".to_string()));
        }

        let mut statements = Vec::new();
        for (old, new) in &changes.rename_columns {
            let old = self.body_column_for_ddl(&table, old)?;
            let new = Ident::declare(new)?;
            statements.push(format!("ALTER TABLE {table} RENAME COLUMN {old} TO {new}"));
        }

        for column in &changes.drop_columns {
            let column = self.body_column_for_ddl(&table, column)?;
            statements.push(format!("ALTER TABLE {table} DROP COLUMN {column}"));
        }

        for (name, definition) in &changes.new_columns {
            if definition.primary_key {
                return Err(Error::InvalidBody(format!(
                    "column {name} cannot be added as a primary key"
                )));
            }
            let ident = Ident::declare(name)?;
            let mut sql = format!("ALTER TABLE {table} ADD COLUMN {}", column_sql(&ident, definition)?);
            if let Some(reference) = self.reference(name, definition, None)? {
                sql.push(' ');
                sql.push_str(&reference.render());
            }
            statements.push(sql);
        }

        if let Some(new_name) = &changes.new_name {
            let new_name = Ident::declare(new_name)?;
            statements.push(format!("ALTER TABLE {table} RENAME TO {new_name}"));
        }

        Ok(statements
            .into_iter()
            .map(CompiledStatement::without_args)
            .collect())
    }

    pub fn drop_table(&self, table: &str) -> Result<CompiledStatement> {
        let table = self.validator.validate_table(table)?;
        Ok(CompiledStatement::without_args(format!("DROP TABLE {table}")))
    }

    fn body_column_for_ddl(&self, table: &Ident, name: &str) -> Result<Ident> {
        if name == "*" {
            return Err(Error::unknown_column(table.as_str(), name));
        }
        self.validator.validate_column(table.as_str(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaSnapshot;
    use serde_json::json;

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::builder()
            .table("users", &[("id", "INTEGER"), ("name", "TEXT")])
            .primary_key("users", "id")
            .build()
            .unwrap()
    }

    fn columns(body: JsonValue) -> BTreeMap<String, ColumnDefinition> {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_column_type_and_actions() {
        assert_eq!(ColumnType::parse("a", "Integer").unwrap(), ColumnType::Integer);
        assert!(matches!(
            ColumnType::parse("a", "varchar"),
            Err(Error::InvalidColumnType { column, declared }) if column == "a" && declared == "varchar"
        ));
        assert_eq!(ReferentialAction::parse("SET NULL").unwrap().sql(), "SET NULL");
        assert!(matches!(
            ReferentialAction::parse("explode"),
            Err(Error::InvalidReferentialAction(_))
        ));
    }

    #[test]
    fn test_create_table() {
        let snapshot = snapshot();
        let compiler = QueryCompiler::new(&snapshot);
        let body = columns(json!({
            "id": {"type": "integer", "primaryKey": true},
            "title": {"type": "text", "notNull": true, "default": "it's"},
            "owner_id": {"type": "integer", "references": "users.id", "onDelete": "cascade"},
            "score": {"type": "real", "unique": true, "default": 1.5}
        }));

        let stmt = compiler.create_table("posts", &body).unwrap();
        assert_eq!(
            stmt.text,
            concat!(
                r#"CREATE TABLE "posts" ("id" INTEGER PRIMARY KEY, "owner_id" INTEGER, "#,
                r#""score" REAL UNIQUE DEFAULT 1.5, "title" TEXT NOT NULL DEFAULT 'it''s', "#,
                r#"FOREIGN KEY ("owner_id") REFERENCES "users" ("id") ON DELETE CASCADE)"#
            )
        );
        assert!(stmt.args.is_empty());
    }

    #[test]
    fn test_create_table_self_reference() {
        let snapshot = snapshot();
        let compiler = QueryCompiler::new(&snapshot);
        let body = columns(json!({
            "id": {"type": "integer", "primaryKey": true},
            "parent_id": {"type": "integer", "references": "nodes.id"}
        }));
        let stmt = compiler.create_table("nodes", &body).unwrap();
        assert!(stmt
            .text
            .ends_with(r#"FOREIGN KEY ("parent_id") REFERENCES "nodes" ("id"))"#));
    }

    #[test]
    fn test_create_table_errors() {
        let snapshot = snapshot();
        let compiler = QueryCompiler::new(&snapshot);

        let two_keys = columns(json!({
            "a": {"type": "integer", "primaryKey": true},
            "b": {"type": "integer", "primaryKey": true}
        }));
        assert!(matches!(compiler.create_table("t", &two_keys), Err(Error::InvalidBody(_))));

        let bad_type = columns(json!({"a": {"type": "uuid"}}));
        assert!(matches!(
            compiler.create_table("t", &bad_type),
            Err(Error::InvalidColumnType { .. })
        ));

        let bad_ref = columns(json!({"a": {"type": "integer", "references": "groups.id"}}));
        assert!(matches!(
            compiler.create_table("t", &bad_ref),
            Err(Error::UnknownTable(_))
        ));

        let bad_action = columns(json!({
            "a": {"type": "integer", "references": "users.id", "onUpdate": "later"}
        }));
        assert!(matches!(
            compiler.create_table("t", &bad_action),
            Err(Error::InvalidReferentialAction(_))
        ));

        assert!(matches!(
            compiler.create_table("sqlite_stat1", &columns(json!({"a": {"type": "text"}}))),
            Err(Error::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            compiler.create_table("t", &BTreeMap::new()),
            Err(Error::InvalidBody(_))
        ));
    }

    #[test]
    fn test_alter_table() {
        let snapshot = snapshot();
        let compiler = QueryCompiler::new(&snapshot);
        let changes: TableChanges = serde_json::from_value(json!({
            "renameColumns": {"name": "full_name"},
            "dropColumns": ["id"],
            "newColumns": {"team_id": {"type": "integer", "references": "users.id", "onDelete": "set null"}},
            "newName": "members"
        }))
        .unwrap();

        let statements: Vec<String> = compiler
            .alter_table("users", &changes)
            .unwrap()
            .into_iter()
            .map(|s| s.text)
            .collect();
        assert_eq!(
            statements,
            vec![
                r#"ALTER TABLE "users" RENAME COLUMN "name" TO "full_name""#,
                r#"ALTER TABLE "users" DROP COLUMN "id""#,
                r#"ALTER TABLE "users" ADD COLUMN "team_id" INTEGER REFERENCES "users" ("id") ON DELETE SET NULL"#,
                r#"ALTER TABLE "users" RENAME TO "members""#,
            ]
        );
    }

    #[test]
    fn test_alter_table_errors() {
        let snapshot = snapshot();
        let compiler = QueryCompiler::new(&snapshot);
        assert!(matches!(
            compiler.alter_table("users", &TableChanges::default()),
            Err(Error::InvalidBody(_))
        ));

        let changes = TableChanges {
            drop_columns: vec!["email".to_string()],
            ..TableChanges::default()
        };
        assert!(matches!(
            compiler.alter_table("users", &changes),
            Err(Error::UnknownColumn { .. })
        ));
        assert!(matches!(
            compiler.alter_table("groups", &changes),
            Err(Error::UnknownTable(_))
        ));
    }

    #[test]
    fn test_drop_table() {
        let snapshot = snapshot();
        let compiler = QueryCompiler::new(&snapshot);
        assert_eq!(compiler.drop_table("users").unwrap().text, r#"DROP TABLE "users""#);
        assert!(compiler.drop_table("users; DROP TABLE x").is_err());
    }
}
