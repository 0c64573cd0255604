//! Filter parser
//!
//! A filter parameter `column=op.value...` becomes an [`AtomicPredicate`]
//! whose value is a dot separated token sequence. Tokens matching the
//! operator keyword table render as SQL keywords, everything else is an
//! operand and is bound as an argument. `or=(clause,clause)` becomes one
//! [`Predicate::Or`].

use sqlrest_common::error::{Error, Result};
use sqlrest_common::types::Value;

use crate::request::{RequestParams, OR_PARAM};
use crate::scan::{split_raw, strip_parens, unquote, ScanError};
use crate::select::SelectionNode;
use crate::validate::{Ident, IdentifierValidator};

/// Filter operator keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    Glob,
    Between,
    In,
    Is,
    Not,
    And,
    Or,
}

impl Operator {
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "eq" => Self::Eq,
            "neq" => Self::Neq,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "like" => Self::Like,
            "glob" => Self::Glob,
            "between" => Self::Between,
            "in" => Self::In,
            "is" => Self::Is,
            "not" => Self::Not,
            "and" => Self::And,
            "or" => Self::Or,
            _ => return None,
        })
    }

    #[must_use]
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Like => "LIKE",
            Self::Glob => "GLOB",
            Self::Between => "BETWEEN",
            Self::In => "IN",
            Self::Is => "IS",
            Self::Not => "NOT",
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterToken {
    Operator(Operator),
    /// Bound as a text argument
    Operand(String),
    /// Unquoted `null` after `is` / `is.not`
    Null,
    /// Parenthesized operand list after `in`
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicPredicate {
    pub table: Ident,
    pub column: Ident,
    pub tokens: Vec<FilterToken>,
}

impl AtomicPredicate {
    /// The leading operator
    #[must_use]
    pub fn operator(&self) -> Option<Operator> {
        match self.tokens.first() {
            Some(FilterToken::Operator(op)) => Some(*op),
            _ => None,
        }
    }

    /// Every value that will be bound, in order
    #[must_use]
    pub fn operands(&self) -> Vec<&str> {
        self.tokens
            .iter()
            .flat_map(|token| match token {
                FilterToken::Operand(text) => vec![text.as_str()],
                FilterToken::List(items) => items.iter().map(String::as_str).collect(),
                FilterToken::Operator(_) | FilterToken::Null => Vec::new(),
            })
            .collect()
    }

    fn has_operator(&self, operator: Operator) -> bool {
        self.tokens.contains(&FilterToken::Operator(operator))
    }

    /// Render as SQL, pushing bound values onto `args`.
    pub fn render(&self, args: &mut Vec<Value>) -> String {
        let mut sql = format!("{}.{}", self.table, self.column);
        let mut after_in = false;

        for token in &self.tokens {
            sql.push(' ');
            match token {
                FilterToken::Operator(op) => sql.push_str(op.sql()),
                FilterToken::Operand(text) => {
                    sql.push_str(if after_in { "(?)" } else { "?" });
                    args.push(Value::Text(text.clone()));
                }
                FilterToken::Null => sql.push_str("NULL"),
                FilterToken::List(items) => {
                    sql.push('(');
                    sql.push_str(&vec!["?"; items.len()].join(", "));
                    sql.push(')');
                    args.extend(items.iter().cloned().map(Value::Text));
                }
            }
            after_in = *token == FilterToken::Operator(Operator::In);
        }

        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Atomic(AtomicPredicate),
    Or(Vec<AtomicPredicate>),
}

impl Predicate {
    pub fn render(&self, args: &mut Vec<Value>) -> String {
        match self {
            Predicate::Atomic(p) if p.has_operator(Operator::Or) => format!("({})", p.render(args)),
            Predicate::Atomic(p) => p.render(args),
            Predicate::Or(clauses) => {
                let parts: Vec<String> = clauses.iter().map(|c| c.render(args)).collect();
                format!("({})", parts.join(" OR "))
            }
        }
    }

    /// Every atomic predicate, including those inside an or group
    pub fn atoms(&self) -> impl Iterator<Item = &AtomicPredicate> {
        match self {
            Predicate::Atomic(p) => std::slice::from_ref(p).iter(),
            Predicate::Or(clauses) => clauses.iter(),
        }
    }
}

/// ` WHERE ...` for the given predicates, or nothing when there are none
pub fn where_clause(predicates: &[Predicate], args: &mut Vec<Value>) -> String {
    let parts: Vec<String> = predicates.iter().map(|p| p.render(args)).collect();
    where_sql(&parts)
}

/// ` WHERE a AND b ...` over already rendered conditions
pub(crate) fn where_sql(conditions: &[String]) -> String {
    if conditions.is_empty() {
        return String::new();
    }
    format!(" WHERE {}", conditions.join(" AND "))
}

/// Tables that a filter or order term may reference in one statement
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    root: &'a Ident,
    embedded: Vec<&'a Ident>,
}

impl<'a> Scope<'a> {
    /// Only the statement's own table
    #[must_use]
    pub fn table(root: &'a Ident) -> Self {
        Self {
            root,
            embedded: Vec::new(),
        }
    }

    /// The root table and the relations embedded directly under it
    #[must_use]
    pub fn selection(node: &'a SelectionNode) -> Self {
        Self {
            root: &node.table,
            embedded: node.children.iter().map(|c| &c.table).collect(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &'a Ident {
        self.root
    }

    pub(crate) fn resolve(
        &self,
        validator: &IdentifierValidator<'_>,
        table: Option<&str>,
        column: &str,
    ) -> Result<(Ident, Ident)> {
        let table = match table {
            None => self.root.clone(),
            Some(name) if self.root.as_str() == name => self.root.clone(),
            Some(name) => match self.embedded.iter().find(|t| t.as_str() == name) {
                Some(t) => (*t).clone(),
                None => {
                    validator.validate_table(name)?;
                    return Err(Error::InvalidFilter(format!(
                        "table {name} is not embedded directly under {}",
                        self.root.as_str()
                    )));
                }
            },
        };

        if column == "*" {
            return Err(Error::InvalidFilter(format!(
                "'*' is not a column of {}",
                table.as_str()
            )));
        }
        let column = validator.validate_column(table.as_str(), column)?;
        Ok((table, column))
    }
}

fn invalid(e: ScanError) -> Error {
    Error::InvalidFilter(e.to_string())
}

/// Parse every filter and or group in `params`, in the order they were sent.
pub fn parse_filters(
    validator: &IdentifierValidator<'_>,
    scope: &Scope<'_>,
    params: &RequestParams,
) -> Result<Vec<Predicate>> {
    let mut predicates = Vec::new();
    for (name, value) in params.filters() {
        if name == OR_PARAM {
            predicates.push(parse_or_group(validator, scope, value)?);
        } else {
            predicates.push(Predicate::Atomic(parse_filter(validator, scope, name, value)?));
        }
    }
    Ok(predicates)
}

/// Parse a single `name=value` filter parameter.
pub fn parse_filter(
    validator: &IdentifierValidator<'_>,
    scope: &Scope<'_>,
    name: &str,
    value: &str,
) -> Result<AtomicPredicate> {
    let segments = split_raw(name, '.').map_err(invalid)?;
    let (table, column) = match segments.as_slice() {
        [column] => (None, unquote(column).map_err(invalid)?.text),
        [table, column] => (
            Some(unquote(table).map_err(invalid)?.text),
            unquote(column).map_err(invalid)?.text,
        ),
        _ => {
            return Err(Error::InvalidFilter(format!(
                "{name:?} is neither a column nor table.column"
            )))
        }
    };

    let (table, column) = scope.resolve(validator, table.as_deref(), &column)?;
    let value_segments = split_raw(value, '.').map_err(invalid)?;
    let tokens = parse_tokens(&value_segments, name)?;

    Ok(AtomicPredicate {
        table,
        column,
        tokens,
    })
}

/// Parse an `or=(clause,clause,...)` value.
pub fn parse_or_group(
    validator: &IdentifierValidator<'_>,
    scope: &Scope<'_>,
    value: &str,
) -> Result<Predicate> {
    let inner = strip_parens(value).ok_or_else(|| {
        Error::InvalidFilter(format!("or group {value:?} must be wrapped in parentheses"))
    })?;

    let mut clauses = Vec::new();
    for clause in split_raw(inner, ',').map_err(invalid)? {
        if clause.is_empty() {
            continue;
        }
        let segments = split_raw(clause, '.').map_err(invalid)?;
        let Some((first, rest)) = segments.split_first() else {
            continue;
        };

        let first = unquote(first).map_err(invalid)?.text;
        let root = scope.root().as_str();
        let (table, column, value_segments) = if validator.snapshot().has_column(root, &first) {
            (None, first, rest)
        } else if let Some((column, value_segments)) = rest.split_first() {
            let column = unquote(column).map_err(invalid)?.text;
            (Some(first), column, value_segments)
        } else {
            return Err(Error::unknown_column(root, &first));
        };

        let (table, column) = scope.resolve(validator, table.as_deref(), &column)?;
        let tokens = parse_tokens(value_segments, clause)?;
        clauses.push(AtomicPredicate {
            table,
            column,
            tokens,
        });
    }

    if clauses.is_empty() {
        return Err(Error::InvalidFilter("or group has no clauses".to_string()));
    }
    Ok(Predicate::Or(clauses))
}

fn parse_tokens(segments: &[&str], context: &str) -> Result<Vec<FilterToken>> {
    if segments.is_empty() || segments == [""] {
        return Err(Error::InvalidFilter(format!("filter {context:?} has no value")));
    }

    let mut tokens: Vec<FilterToken> = Vec::with_capacity(segments.len());
    for raw in segments {
        if follows_in(&tokens) {
            if let Some(inner) = strip_parens(raw) {
                tokens.push(parse_list(inner, context)?);
                continue;
            }
        }

        let word = unquote(raw).map_err(invalid)?;
        if !word.literal {
            if let Some(op) = Operator::from_keyword(&word.text) {
                tokens.push(FilterToken::Operator(op));
                continue;
            }
            if follows_is(&tokens) && word.text.eq_ignore_ascii_case("null") {
                tokens.push(FilterToken::Null);
                continue;
            }
        }
        tokens.push(FilterToken::Operand(word.text));
    }

    if !matches!(tokens.first(), Some(FilterToken::Operator(_))) {
        return Err(Error::InvalidFilter(format!(
            "filter {context:?} must start with an operator"
        )));
    }
    if tokens.iter().all(|t| matches!(t, FilterToken::Operator(_))) {
        return Err(Error::InvalidFilter(format!("filter {context:?} has no operand")));
    }
    Ok(tokens)
}

fn parse_list(inner: &str, context: &str) -> Result<FilterToken> {
    if inner.is_empty() {
        return Err(Error::InvalidFilter(format!("filter {context:?} has an empty list")));
    }
    let items = split_raw(inner, ',')
        .map_err(invalid)?
        .into_iter()
        .map(|item| unquote(item).map(|w| w.text).map_err(invalid))
        .collect::<Result<Vec<_>>>()?;
    Ok(FilterToken::List(items))
}

fn follows_in(tokens: &[FilterToken]) -> bool {
    matches!(tokens.last(), Some(FilterToken::Operator(Operator::In)))
}

fn follows_is(tokens: &[FilterToken]) -> bool {
    match tokens {
        [.., FilterToken::Operator(Operator::Is)] => true,
        [.., FilterToken::Operator(Operator::Is), FilterToken::Operator(Operator::Not)] => true,
        _ => false,
    }
}
