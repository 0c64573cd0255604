//! sqlrest Common Types and Utilities
//!
//! Shared error taxonomy, configuration, and bound value types for the
//! sqlrest query compiler and schema cache.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod types;

pub use config::SqlRestConfig;
pub use error::{Error, Result};
pub use types::{Column, Row, Value};
