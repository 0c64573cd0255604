//! Error types for the sqlrest query compiler and schema cache

use thiserror::Error;

/// sqlrest error types
#[derive(Error, Debug)]
pub enum Error {
    // Identifier Errors
    #[error(
        "table {0} does not exist in the schema cache. \
         You may need to invalidate the schema cache if it is stale"
    )]
    UnknownTable(String),

    #[error(
        "column {column} does not exist on table {table} in the schema cache. \
         You may need to invalidate the schema cache if it is stale"
    )]
    UnknownColumn { table: String, column: String },

    #[error("invalid identifier {name:?}: {reason}")]
    InvalidIdentifier { name: String, reason: String },

    // Request Errors
    #[error("malformed select expression: {0}")]
    MalformedSelectExpression(String),

    #[error("unknown sort direction {0:?}, expected asc or desc")]
    UnknownSortDirection(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid query parameter: {0}")]
    InvalidQueryParam(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error(
        "no relationship exists in the schema cache between {table} and {other}. \
         You may need to invalidate the schema cache if it is stale"
    )]
    MissingRelationship { table: String, other: String },

    #[error("all deletes require a where clause")]
    MissingWhereClause,

    #[error("table {0} has no single-column primary key")]
    MissingPrimaryKey(String),

    // DDL Errors
    #[error("column {column} has unsupported type {declared:?}, expected text, integer, real or blob")]
    InvalidColumnType { column: String, declared: String },

    #[error("unsupported referential action {0:?}")]
    InvalidReferentialAction(String),

    // Schema Cache Errors
    #[error("invalid schema snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("schema snapshot encoding error: {0}")]
    SnapshotEncoding(String),

    // Store Errors
    #[error("store execution error: {0}")]
    StoreExecution(String),

    // General Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for sqlrest operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP status code for each error type
impl Error {
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::UnknownColumn { .. }
            | Self::InvalidIdentifier { .. }
            | Self::MalformedSelectExpression(_)
            | Self::UnknownSortDirection(_)
            | Self::InvalidFilter(_)
            | Self::InvalidQueryParam(_)
            | Self::InvalidBody(_)
            | Self::MissingRelationship { .. }
            | Self::MissingWhereClause
            | Self::InvalidColumnType { .. }
            | Self::InvalidReferentialAction(_)
            | Self::JsonError(_) => 400,

            // 404 Not Found
            Self::UnknownTable(_) => 404,

            // 422 Unprocessable Entity
            Self::MissingPrimaryKey(_) => 422,

            // 500 Internal Server Error
            Self::InvalidSnapshot(_)
            | Self::SnapshotEncoding(_)
            | Self::StoreExecution(_)
            | Self::ConfigError(_)
            | Self::IoError(_) => 500,
        }
    }

    /// Stable error code for API responses
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownTable(_) => "unknown_table",
            Self::UnknownColumn { .. } => "unknown_column",
            Self::InvalidIdentifier { .. } => "invalid_identifier",
            Self::MalformedSelectExpression(_) => "malformed_select",
            Self::UnknownSortDirection(_) => "unknown_sort_direction",
            Self::InvalidFilter(_) => "invalid_filter",
            Self::InvalidQueryParam(_) => "invalid_param",
            Self::InvalidBody(_) => "invalid_body",
            Self::MissingRelationship { .. } => "missing_relationship",
            Self::MissingWhereClause => "missing_where_clause",
            Self::MissingPrimaryKey(_) => "missing_primary_key",
            Self::InvalidColumnType { .. } => "invalid_column_type",
            Self::InvalidReferentialAction(_) => "invalid_referential_action",
            Self::InvalidSnapshot(_) => "invalid_snapshot",
            Self::SnapshotEncoding(_) => "snapshot_encoding",
            Self::StoreExecution(_) => "store_error",
            Self::ConfigError(_) => "config_error",
            Self::IoError(_) => "io_error",
            Self::JsonError(_) => "json_error",
        }
    }

    /// Shorthand for an unknown column on a table
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(Error::UnknownTable("users".into()).status_code(), 404);
        assert_eq!(Error::MissingWhereClause.status_code(), 400);
        assert_eq!(Error::StoreExecution("boom".into()).status_code(), 500);
        assert_eq!(Error::MissingPrimaryKey("logs".into()).status_code(), 422);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::unknown_column("users", "nope").error_code(),
            "unknown_column"
        );
        assert_eq!(
            Error::UnknownSortDirection("up".into()).error_code(),
            "unknown_sort_direction"
        );
    }

    #[test]
    fn test_stale_cache_hint() {
        let err = Error::MissingRelationship {
            table: "foo".into(),
            other: "users".into(),
        };
        let message = err.to_string();
        assert!(message.contains("foo"));
        assert!(message.contains("users"));
        assert!(message.contains("invalidate the schema cache"));
    }
}
