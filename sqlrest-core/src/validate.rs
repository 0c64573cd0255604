//! Identifier validation
//!
//! Table and column names cannot be bound as parameters, so they are spliced
//! into statement text. An [`Ident`] can only be obtained from the
//! [`IdentifierValidator`] (for names that exist in the snapshot) or from
//! [`Ident::declare`] (for names a DDL statement is about to create); the
//! compilers render nothing else in identifier position.

use std::fmt;

use sqlrest_common::error::{Error, Result};

use crate::schema::{ColumnMap, SchemaSnapshot};

/// A table or column name that is safe to render into statement text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident(String);

impl Ident {
    fn trusted(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Accept a new name for a table or column that does not exist yet.
    pub fn declare(name: &str) -> Result<Self> {
        let reason = if name.is_empty() {
            Some("identifier is empty")
        } else if name.contains('\0') {
            Some("identifier contains a NUL byte")
        } else if name.to_ascii_lowercase().starts_with("sqlite_") {
            Some("names beginning with sqlite_ are reserved")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(Error::InvalidIdentifier {
                name: name.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(Self::trusted(name)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Renders as a double-quoted SQL identifier.
impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0.replace('"', "\"\""))
    }
}

impl PartialEq<str> for Ident {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Ident {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Render text as a single-quoted SQL string literal.
#[must_use]
pub fn string_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Checks identifiers against one schema snapshot.
#[derive(Debug, Clone, Copy)]
pub struct IdentifierValidator<'a> {
    snapshot: &'a SchemaSnapshot,
}

impl<'a> IdentifierValidator<'a> {
    #[must_use]
    pub fn new(snapshot: &'a SchemaSnapshot) -> Self {
        Self { snapshot }
    }

    #[must_use]
    pub fn snapshot(&self) -> &'a SchemaSnapshot {
        self.snapshot
    }

    pub fn validate_table(&self, name: &str) -> Result<Ident> {
        self.table_columns(name).map(|_| Ident::trusted(name))
    }

    /// Validate `name` as a column of `table`. `*` is valid on any known
    /// table; callers decide whether a star is allowed in their position.
    pub fn validate_column(&self, table: &str, name: &str) -> Result<Ident> {
        let columns = self.table_columns(table)?;
        if name == "*" || columns.contains_key(name) {
            Ok(Ident::trusted(name))
        } else {
            Err(Error::unknown_column(table, name))
        }
    }

    pub fn table_columns(&self, table: &str) -> Result<&'a ColumnMap> {
        self.snapshot
            .columns(table)
            .ok_or_else(|| Error::UnknownTable(table.to_string()))
    }

    /// All declared columns of a validated table, in snapshot order.
    pub fn expand_star(&self, table: &Ident) -> Result<Vec<Ident>> {
        Ok(self
            .table_columns(table.as_str())?
            .keys()
            .map(|name| Ident::trusted(name.as_str()))
            .collect())
    }

    /// The table's primary key, validated.
    #[must_use]
    pub fn primary_key(&self, table: &Ident) -> Option<Ident> {
        self.snapshot
            .primary_key(table.as_str())
            .map(Ident::trusted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::builder()
            .table("users", &[("id", "INTEGER"), ("first name", "TEXT")])
            .primary_key("users", "id")
            .build()
            .unwrap()
    }

    #[test]
    fn test_validate_table() {
        let snapshot = snapshot();
        let validator = IdentifierValidator::new(&snapshot);
        assert_eq!(validator.validate_table("users").unwrap(), "users");
        assert!(matches!(
            validator.validate_table("cars"),
            Err(Error::UnknownTable(name)) if name == "cars"
        ));
    }

    #[test]
    fn test_validate_column() {
        let snapshot = snapshot();
        let validator = IdentifierValidator::new(&snapshot);
        assert!(validator.validate_column("users", "first name").is_ok());
        assert!(validator.validate_column("users", "*").is_ok());
        assert!(matches!(
            validator.validate_column("users", "age"),
            Err(Error::UnknownColumn { .. })
        ));
        assert!(matches!(
            validator.validate_column("cars", "*"),
            Err(Error::UnknownTable(_))
        ));
    }

    #[test]
    fn test_injection_attempts_rejected() {
        let snapshot = snapshot();
        let validator = IdentifierValidator::new(&snapshot);
        for attempt in ["users; DROP TABLE users", "id--", "id' OR '1'='1", "\"id\""] {
            assert!(validator.validate_table(attempt).is_err());
            assert!(validator.validate_column("users", attempt).is_err());
        }
    }

    #[test]
    fn test_display_quotes_identifier() {
        assert_eq!(Ident::trusted("first name").to_string(), "\"first name\"");
        assert_eq!(Ident::trusted("we\"ird").to_string(), "\"we\"\"ird\"");
    }

    #[test]
    fn test_declare() {
        assert!(Ident::declare("orders").is_ok());
        assert!(Ident::declare("").is_err());
        assert!(Ident::declare("sqlite_master").is_err());
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(string_literal("it's"), "'it''s'");
    }
}
