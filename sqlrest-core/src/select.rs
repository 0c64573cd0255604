//! Selection parser for the `select` query parameter
//!
//! ```text
//! items := item ("," item)*
//! item  := word | alias ":" word | table "(" items ")"
//! ```
//!
//! Every column is validated against the table it is nested under and every
//! embedded table is validated as it is opened.

use std::collections::BTreeSet;

use sqlrest_common::error::{Error, Result};

use crate::scan::{tokenize, Token, Word};
use crate::validate::{Ident, IdentifierValidator};

const PUNCTUATION: [char; 4] = [',', ':', '(', ')'];

/// One entry in a node's column list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectColumn {
    /// Every column the snapshot declares for the table
    Star,
    Named { column: Ident, alias: Option<String> },
}

impl SelectColumn {
    /// Key used for this column in the emitted JSON object
    #[must_use]
    pub fn json_key(&self) -> Option<&str> {
        match self {
            SelectColumn::Star => None,
            SelectColumn::Named { column, alias } => {
                Some(alias.as_deref().unwrap_or(column.as_str()))
            }
        }
    }
}

/// A table in the selection tree with its columns and embedded relations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionNode {
    pub table: Ident,
    pub columns: Vec<SelectColumn>,
    pub children: Vec<SelectionNode>,
}

impl SelectionNode {
    /// All columns of `table`, nothing embedded
    #[must_use]
    pub fn all(table: Ident) -> Self {
        Self {
            table,
            columns: vec![SelectColumn::Star],
            children: Vec::new(),
        }
    }

    fn empty(table: Ident) -> Self {
        Self {
            table,
            columns: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Parse a select expression rooted at `root`.
    pub fn parse(
        validator: &IdentifierValidator<'_>,
        root: &str,
        expr: &str,
        max_depth: usize,
    ) -> Result<Self> {
        let table = validator.validate_table(root)?;
        if expr.is_empty() || expr == "*" {
            return Ok(Self::all(table));
        }

        let tokens = tokenize(expr, &PUNCTUATION)
            .map_err(|e| Error::MalformedSelectExpression(e.to_string()))?;

        let mut parser = SelectParser {
            tokens,
            pos: 0,
            validator,
            max_depth,
        };

        let mut node = Self::empty(table);
        parser.parse_items(&mut node, 0)?;
        if parser.pos < parser.tokens.len() {
            return Err(Error::MalformedSelectExpression(
                "unbalanced parentheses".to_string(),
            ));
        }

        node.default_to_star();
        node.check_unique_keys(validator)?;
        Ok(node)
    }

    /// Embedded relation directly under this node
    #[must_use]
    pub fn child(&self, table: &str) -> Option<&SelectionNode> {
        self.children.iter().find(|c| c.table == table)
    }

    /// Whether this node selects `column`, either by name or through `*`
    #[must_use]
    pub fn selects(&self, column: &str) -> bool {
        self.columns.iter().any(|c| match c {
            SelectColumn::Star => true,
            SelectColumn::Named { column: name, .. } => name == column,
        })
    }

    /// Nesting depth of the tree, the root alone being zero
    #[must_use]
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(|c| c.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    fn default_to_star(&mut self) {
        if self.columns.is_empty() && self.children.is_empty() {
            self.columns.push(SelectColumn::Star);
        }
    }

    /// Every node must yield distinct JSON keys: `*` claims each declared
    /// column and an embedded relation claims its table name.
    fn check_unique_keys(&self, validator: &IdentifierValidator<'_>) -> Result<()> {
        let mut seen = BTreeSet::new();
        let mut claim = |key: &str| {
            if seen.insert(key.to_string()) {
                Ok(())
            } else {
                Err(malformed(format!(
                    "key {key:?} is selected twice under {}",
                    self.table.as_str()
                )))
            }
        };

        for column in &self.columns {
            match column.json_key() {
                Some(key) => claim(key)?,
                None => {
                    for name in validator.table_columns(self.table.as_str())?.keys() {
                        claim(name)?;
                    }
                }
            }
        }
        for child in &self.children {
            claim(child.table.as_str())?;
            child.check_unique_keys(validator)?;
        }
        Ok(())
    }
}

struct SelectParser<'a, 'v> {
    tokens: Vec<Token>,
    pos: usize,
    validator: &'a IdentifierValidator<'v>,
    max_depth: usize,
}

impl SelectParser<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_punct(&self, c: char) -> bool {
        matches!(self.peek(), Some(Token::Punct(p)) if *p == c)
    }

    fn next_word(&mut self, after: &str) -> Result<Word> {
        match self.tokens.get(self.pos) {
            Some(Token::Word(word)) => {
                self.pos += 1;
                Ok(word.clone())
            }
            Some(Token::Punct(c)) => Err(malformed(format!("unexpected '{c}' after {after}"))),
            None => Err(malformed(format!("expression ends after {after}"))),
        }
    }

    fn parse_items(&mut self, node: &mut SelectionNode, depth: usize) -> Result<()> {
        loop {
            match self.peek() {
                None | Some(Token::Punct(')')) => return Ok(()),
                // empty item, as in "id,,name" or a trailing comma
                Some(Token::Punct(',')) => {
                    self.pos += 1;
                    continue;
                }
                Some(Token::Word(_)) => self.parse_item(node, depth)?,
                Some(Token::Punct(c)) => return Err(malformed(format!("unexpected '{c}'"))),
            }

            match self.peek() {
                Some(Token::Punct(',')) => self.pos += 1,
                None | Some(Token::Punct(')')) => {}
                Some(Token::Punct(c)) => return Err(malformed(format!("unexpected '{c}'"))),
                Some(Token::Word(w)) => {
                    return Err(malformed(format!("missing ',' before {:?}", w.text)))
                }
            }
        }
    }

    fn parse_item(&mut self, node: &mut SelectionNode, depth: usize) -> Result<()> {
        let first = self.next_word("the start of an item")?;

        if self.peek_punct(':') {
            self.pos += 1;
            let column = self.next_word(&format!("alias {:?}", first.text))?;
            if self.peek_punct('(') {
                return Err(malformed(format!(
                    "embedded relation {:?} cannot be aliased",
                    column.text
                )));
            }
            if column.text == "*" {
                return Err(malformed("'*' cannot be aliased".to_string()));
            }
            let column = self
                .validator
                .validate_column(node.table.as_str(), &column.text)?;
            node.columns.push(SelectColumn::Named {
                column,
                alias: Some(first.text),
            });
            return Ok(());
        }

        if self.peek_punct('(') {
            self.pos += 1;
            if depth + 1 > self.max_depth {
                return Err(malformed(format!(
                    "embedding is nested deeper than {} levels",
                    self.max_depth
                )));
            }
            let table = self.validator.validate_table(&first.text)?;
            if node.child(table.as_str()).is_some() {
                return Err(malformed(format!(
                    "relation {} is embedded twice under {}",
                    table.as_str(),
                    node.table.as_str()
                )));
            }

            let mut child = SelectionNode::empty(table);
            self.parse_items(&mut child, depth + 1)?;
            if !self.peek_punct(')') {
                return Err(malformed("unbalanced parentheses".to_string()));
            }
            self.pos += 1;

            child.default_to_star();
            node.children.push(child);
            return Ok(());
        }

        if first.text == "*" {
            node.columns.push(SelectColumn::Star);
        } else {
            let column = self
                .validator
                .validate_column(node.table.as_str(), &first.text)?;
            node.columns.push(SelectColumn::Named {
                column,
                alias: None,
            });
        }
        Ok(())
    }
}

fn malformed(message: String) -> Error {
    Error::MalformedSelectExpression(message)
}
