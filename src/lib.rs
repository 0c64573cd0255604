//! sqlrest
//!
//! REST-style query compiler and schema cache for SQLite-compatible stores.
//! Re-exports the member crates under one name for the binary and for
//! embedding applications.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub use sqlrest_common as common;
pub use sqlrest_core as query;

pub use sqlrest_common::config::SqlRestConfig;
pub use sqlrest_common::error::{Error, Result};
pub use sqlrest_core::{Database, SchemaCache, Store};
