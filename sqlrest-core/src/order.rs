//! Order parser for `order=column[.asc|.desc],...`

use sqlrest_common::error::{Error, Result};

use crate::filter::Scope;
use crate::scan::{split_raw, unquote, ScanError, Word};
use crate::validate::{Ident, IdentifierValidator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Asc,
    Desc,
    #[default]
    Unspecified,
}

impl Direction {
    fn parse(word: &Word) -> Option<Self> {
        if word.literal {
            return None;
        }
        match word.text.as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Asc => " ASC",
            Self::Desc => " DESC",
            Self::Unspecified => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub table: Ident,
    pub column: Ident,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderSpec {
    pub terms: Vec<OrderTerm>,
}

impl OrderSpec {
    pub fn parse(
        validator: &IdentifierValidator<'_>,
        scope: &Scope<'_>,
        expr: &str,
    ) -> Result<Self> {
        let invalid = |e: ScanError| Error::InvalidQueryParam(format!("order: {e}"));
        let root = scope.root().as_str();
        let snapshot = validator.snapshot();
        let mut terms = Vec::new();

        for item in split_raw(expr, ',').map_err(invalid)? {
            if item.is_empty() {
                continue;
            }
            let words = split_raw(item, '.')
                .map_err(invalid)?
                .into_iter()
                .map(unquote)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(invalid)?;

            let (table, column, direction) = match words.as_slice() {
                [column] => (None, column, Direction::Unspecified),
                [column, dir] if Direction::parse(dir).is_some() => {
                    (None, column, Direction::parse(dir).unwrap_or_default())
                }
                [table, column]
                    if snapshot.has_table(&table.text) && !snapshot.has_column(root, &table.text) =>
                {
                    (Some(table.text.as_str()), column, Direction::Unspecified)
                }
                [_, dir] => return Err(Error::UnknownSortDirection(dir.text.clone())),
                [table, column, dir] => {
                    let direction = Direction::parse(dir)
                        .ok_or_else(|| Error::UnknownSortDirection(dir.text.clone()))?;
                    (Some(table.text.as_str()), column, direction)
                }
                _ => {
                    return Err(Error::InvalidQueryParam(format!(
                        "order term {item:?} has too many parts"
                    )))
                }
            };

            let (table, column) = scope.resolve(validator, table, &column.text)?;
            terms.push(OrderTerm {
                table,
                column,
                direction,
            });
        }

        Ok(Self { terms })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

}

/// ` ORDER BY ...` after any `leading` expressions, or nothing when both are
/// empty
pub(crate) fn order_by<'t>(
    leading: Option<String>,
    terms: impl IntoIterator<Item = &'t OrderTerm>,
) -> String {
    let parts: Vec<String> = leading
        .into_iter()
        .chain(
            terms
                .into_iter()
                .map(|t| format!("{}.{}{}", t.table, t.column, t.direction.sql())),
        )
        .collect();
    if parts.is_empty() {
        return String::new();
    }
    format!(" ORDER BY {}", parts.join(", "))
}
