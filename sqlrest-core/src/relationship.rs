//! Relationship resolution between a parent table and an embedded table

use sqlrest_common::error::{Error, Result};

use crate::schema::{ForeignKey, SchemaSnapshot};
use crate::validate::{Ident, IdentifierValidator};

/// Find the foreign key connecting `parent` and the embedded table `child`.
///
/// A key declared on `child` that references `parent` is preferred over one
/// declared on `parent` that references `child`. Within each group the first
/// key in snapshot order wins.
pub fn resolve<'a>(
    snapshot: &'a SchemaSnapshot,
    parent: &str,
    child: &str,
) -> Result<&'a ForeignKey> {
    let declared_on_child = snapshot
        .foreign_keys()
        .find(|fk| fk.table == child && fk.referenced_table == parent);

    declared_on_child
        .or_else(|| {
            snapshot
                .foreign_keys()
                .find(|fk| fk.table == parent && fk.referenced_table == child)
        })
        .ok_or_else(|| Error::MissingRelationship {
            table: child.to_string(),
            other: parent.to_string(),
        })
}

/// The join columns on each side of a resolved relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub parent_column: Ident,
    pub child_column: Ident,
}

impl Relationship {
    pub fn between(
        validator: &IdentifierValidator<'_>,
        parent: &Ident,
        child: &Ident,
    ) -> Result<Self> {
        let fk = resolve(validator.snapshot(), parent.as_str(), child.as_str())?;

        let (parent_column, child_column) = if fk.table == child.as_str() {
            (&fk.referenced_column, &fk.column)
        } else {
            (&fk.column, &fk.referenced_column)
        };

        Ok(Self {
            parent_column: validator.validate_column(parent.as_str(), parent_column)?,
            child_column: validator.validate_column(child.as_str(), child_column)?,
        })
    }
}
