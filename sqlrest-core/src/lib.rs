//! sqlrest Query Compiler and Schema Cache
//!
//! Compiles REST-style requests into parameterized SQL for SQLite-compatible
//! stores:
//! - `select` expressions with nested embedding of related tables
//! - Column filters with the `eq`/`lt`/`in`/`is`/... operator keywords
//! - `or` groups and `order` expressions
//! - Insert, upsert, update and delete with optional RETURNING
//! - Create, alter and drop table DDL
//!
//! Table and column names are only ever written into statement text after
//! they have been validated against the current schema snapshot; values are
//! always bound.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod compiler;
pub mod database;
pub mod ddl;
pub mod filter;
pub mod introspect;
pub mod mutation;
pub mod order;
pub mod relationship;
pub mod request;
mod scan;
pub mod schema;
pub mod select;
pub mod statement;
pub mod store;
pub mod validate;

pub use cache::SchemaCache;
pub use compiler::QueryCompiler;
pub use database::Database;
pub use ddl::{ColumnDefinition, TableChanges};
pub use filter::{AtomicPredicate, Operator, Predicate, Scope};
pub use introspect::build_snapshot;
pub use mutation::Returning;
pub use order::{Direction, OrderSpec, OrderTerm};
pub use request::RequestParams;
pub use schema::{ForeignKey, SchemaSnapshot};
pub use select::{SelectColumn, SelectionNode};
pub use statement::CompiledStatement;
pub use store::{MemoryStore, RawSchema, Store};
pub use validate::{Ident, IdentifierValidator};
