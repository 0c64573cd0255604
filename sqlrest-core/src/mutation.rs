//! INSERT, UPSERT, UPDATE and DELETE compilation

use serde_json::{Map, Value as JsonValue};

use sqlrest_common::error::{Error, Result};
use sqlrest_common::types::Value;

use crate::compiler::QueryCompiler;
use crate::filter::{where_clause, Predicate};
use crate::scan::{split_raw, unquote, ScanError};
use crate::statement::CompiledStatement;
use crate::validate::{Ident, IdentifierValidator};

/// Output columns requested for a mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Returning {
    #[default]
    Nothing,
    All,
    Columns(Vec<Ident>),
}

impl Returning {
    /// Interpret a mutation's `select` parameter. Absent or empty means no
    /// RETURNING clause; `*` anywhere in the list returns every column.
    pub fn parse(
        validator: &IdentifierValidator<'_>,
        table: &Ident,
        select: Option<&str>,
    ) -> Result<Self> {
        let Some(select) = select.filter(|s| !s.is_empty()) else {
            return Ok(Self::Nothing);
        };

        let malformed = |e: ScanError| Error::MalformedSelectExpression(e.to_string());
        let mut columns = Vec::new();
        for item in split_raw(select, ',').map_err(malformed)? {
            if item.is_empty() {
                continue;
            }
            let word = unquote(item).map_err(malformed)?;
            if word.text == "*" {
                return Ok(Self::All);
            }
            columns.push(validator.validate_column(table.as_str(), &word.text)?);
        }

        Ok(if columns.is_empty() {
            Self::Nothing
        } else {
            Self::Columns(columns)
        })
    }

    fn render(&self) -> String {
        match self {
            Self::Nothing => String::new(),
            Self::All => " RETURNING *".to_string(),
            Self::Columns(columns) => {
                let names: Vec<String> = columns.iter().map(ToString::to_string).collect();
                format!(" RETURNING {}", names.join(", "))
            }
        }
    }
}

fn expect_object<'b>(body: &'b JsonValue, what: &str) -> Result<&'b Map<String, JsonValue>> {
    body.as_object()
        .ok_or_else(|| Error::InvalidBody(format!("{what} body must be a JSON object")))
}

/// Mutations may only filter on their own table
fn check_filters(table: &Ident, filters: &[Predicate]) -> Result<()> {
    match filters
        .iter()
        .flat_map(Predicate::atoms)
        .find(|atom| atom.table != *table)
    {
        Some(atom) => Err(Error::InvalidFilter(format!(
            "table {} cannot be filtered when modifying {}",
            atom.table.as_str(),
            table.as_str()
        ))),
        None => Ok(()),
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl QueryCompiler<'_> {
    fn body_column(&self, table: &Ident, name: &str) -> Result<Ident> {
        if name == "*" {
            return Err(Error::InvalidBody("'*' is not a column name".to_string()));
        }
        self.validator.validate_column(table.as_str(), name)
    }

    /// `INSERT INTO t (cols) VALUES (?, ...)` for a single JSON object
    pub fn insert(
        &self,
        table: &str,
        body: &JsonValue,
        returning: &Returning,
    ) -> Result<CompiledStatement> {
        let table = self.validator.validate_table(table)?;
        let object = expect_object(body, "insert")?;

        if object.is_empty() {
            return Ok(CompiledStatement::without_args(format!(
                "INSERT INTO {table} DEFAULT VALUES{}",
                returning.render()
            )));
        }

        let mut columns = Vec::with_capacity(object.len());
        let mut args = Vec::with_capacity(object.len());
        for (name, value) in object {
            columns.push(self.body_column(&table, name)?.to_string());
            args.push(Value::from_json(value));
        }

        let text = format!(
            "INSERT INTO {table} ({}) VALUES ({}){}",
            columns.join(", "),
            placeholders(args.len()),
            returning.render()
        );
        Ok(CompiledStatement::new(text, args))
    }

    /// Multi-row insert that updates every non-key column on a primary key
    /// conflict. All objects must share the first object's keys.
    pub fn upsert(
        &self,
        table: &str,
        body: &JsonValue,
        returning: &Returning,
    ) -> Result<CompiledStatement> {
        let table = self.validator.validate_table(table)?;
        let rows = body
            .as_array()
            .ok_or_else(|| Error::InvalidBody("upsert body must be a JSON array of objects".to_string()))?;
        let first = match rows.first() {
            Some(first) => expect_object(first, "upsert element")?,
            None => return Err(Error::InvalidBody("upsert body is empty".to_string())),
        };
        if first.is_empty() {
            return Err(Error::InvalidBody("upsert elements have no columns".to_string()));
        }

        let pk = self
            .validator
            .primary_key(&table)
            .ok_or_else(|| Error::MissingPrimaryKey(table.as_str().to_string()))?;

        let keys: Vec<&str> = first.keys().map(String::as_str).collect();
        let columns = keys
            .iter()
            .map(|name| self.body_column(&table, name))
            .collect::<Result<Vec<_>>>()?;

        let mut args = Vec::with_capacity(rows.len() * keys.len());
        let mut values = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let object = expect_object(row, "upsert element")?;
            if object.len() != keys.len() {
                return Err(mismatched(index));
            }
            for key in &keys {
                let value = object.get(*key).ok_or_else(|| mismatched(index))?;
                args.push(Value::from_json(value));
            }
            values.push(format!("({})", placeholders(keys.len())));
        }

        let updates: Vec<String> = columns
            .iter()
            .filter(|column| **column != pk)
            .map(|column| format!("{column} = excluded.{column}"))
            .collect();
        let conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        let names: Vec<String> = columns.iter().map(ToString::to_string).collect();
        let text = format!(
            "INSERT INTO {table} ({}) VALUES {} ON CONFLICT({pk}) {conflict}{}",
            names.join(", "),
            values.join(", "),
            returning.render()
        );
        Ok(CompiledStatement::new(text, args))
    }

    /// `UPDATE t SET col = ?, ...` restricted by the given filters
    pub fn update(
        &self,
        table: &str,
        body: &JsonValue,
        filters: &[Predicate],
        returning: &Returning,
    ) -> Result<CompiledStatement> {
        let table = self.validator.validate_table(table)?;
        check_filters(&table, filters)?;
        let object = expect_object(body, "update")?;
        if object.is_empty() {
            return Err(Error::InvalidBody("update body has no columns".to_string()));
        }

        let mut assignments = Vec::with_capacity(object.len());
        let mut args = Vec::with_capacity(object.len());
        for (name, value) in object {
            assignments.push(format!("{} = ?", self.body_column(&table, name)?));
            args.push(Value::from_json(value));
        }
        let where_sql = where_clause(filters, &mut args);

        let text = format!(
            "UPDATE {table} SET {}{where_sql}{}",
            assignments.join(", "),
            returning.render()
        );
        Ok(CompiledStatement::new(text, args))
    }

    /// `DELETE FROM t WHERE ...`. A delete without filters is refused.
    pub fn delete(
        &self,
        table: &str,
        filters: &[Predicate],
        returning: &Returning,
    ) -> Result<CompiledStatement> {
        if filters.is_empty() {
            return Err(Error::MissingWhereClause);
        }
        let table = self.validator.validate_table(table)?;
        check_filters(&table, filters)?;

        let mut args = Vec::new();
        let where_sql = where_clause(filters, &mut args);
        let text = format!("DELETE FROM {table}{where_sql}{}", returning.render());
        Ok(CompiledStatement::new(text, args))
    }
}

fn mismatched(index: usize) -> Error {
    Error::InvalidBody(format!(
        "upsert element {index} does not have the same keys as the first element"
    ))
}
