//! Compiled statement text and its bound arguments

use serde::{Deserialize, Serialize};

use sqlrest_common::types::Value;

/// SQL text plus the values for its positional placeholders, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledStatement {
    #[serde(rename = "sql")]
    pub text: String,
    pub args: Vec<Value>,
}

impl CompiledStatement {
    pub fn new(text: String, args: Vec<Value>) -> Self {
        debug_assert_eq!(
            placeholder_count(&text),
            args.len(),
            "placeholders and arguments disagree in {text}"
        );
        Self { text, args }
    }

    /// Statement without arguments
    pub fn without_args(text: String) -> Self {
        Self::new(text, Vec::new())
    }
}

/// Count `?` placeholders outside quoted identifiers and string literals.
#[must_use]
pub fn placeholder_count(text: &str) -> usize {
    let mut count = 0;
    let mut quote: Option<char> = None;

    for c in text.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '?') => count += 1,
            (None, _) => {}
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_count_skips_quotes() {
        assert_eq!(placeholder_count("SELECT ? , ?"), 2);
        assert_eq!(placeholder_count(r#"SELECT "wh?t" FROM t WHERE a = ?"#), 1);
        assert_eq!(placeholder_count("SELECT 'it''s?' , ?"), 1);
        assert_eq!(placeholder_count("SELECT 1"), 0);
    }

    #[test]
    fn test_serializes_as_sql_and_args() {
        let stmt = CompiledStatement::new("SELECT ?".into(), vec![Value::Integer(1)]);
        let json = serde_json::to_value(&stmt).unwrap();
        assert_eq!(json["sql"], "SELECT ?");
        assert_eq!(json["args"][0]["value"], 1);
    }
}
