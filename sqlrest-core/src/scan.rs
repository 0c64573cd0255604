//! Lexical helpers shared by the select, filter and order languages
//!
//! All three languages share the same quoting rules: a backslash makes the
//! following character literal anywhere (including inside quotes), and a
//! double quote toggles a quoted run in which delimiters lose their meaning.
//! Quote characters themselves never become part of a word.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanError {
    UnterminatedQuote,
    DanglingEscape,
    UnbalancedParens,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::UnterminatedQuote => f.write_str("unclosed quotation mark"),
            ScanError::DanglingEscape => f.write_str("escape character at end of input"),
            ScanError::UnbalancedParens => f.write_str("unbalanced parentheses"),
        }
    }
}

/// A word after quote and escape processing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Word {
    pub text: String,
    /// Some part of the word was quoted or escaped, so it must be taken
    /// literally and never as a keyword.
    pub literal: bool,
}

impl Word {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        !self.literal && self.text == keyword
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Word(Word),
    Punct(char),
}

/// Split `input` into words and the given punctuation characters.
///
/// Adjacent quoted and unquoted runs join into a single word. Empty words
/// between two punctuation characters are not emitted.
pub(crate) fn tokenize(input: &str, punctuation: &[char]) -> Result<Vec<Token>, ScanError> {
    let mut tokens = Vec::new();
    let mut current = Word::default();
    let mut started = false;
    let mut quoted = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or(ScanError::DanglingEscape)?;
                current.text.push(escaped);
                current.literal = true;
                started = true;
            }
            '"' => {
                quoted = !quoted;
                current.literal = true;
                started = true;
            }
            c if quoted => current.text.push(c),
            c if punctuation.contains(&c) => {
                if started {
                    tokens.push(Token::Word(std::mem::take(&mut current)));
                    started = false;
                }
                tokens.push(Token::Punct(c));
            }
            c => {
                current.text.push(c);
                started = true;
            }
        }
    }

    if quoted {
        return Err(ScanError::UnterminatedQuote);
    }
    if started {
        tokens.push(Token::Word(current));
    }

    Ok(tokens)
}

/// Split on an unquoted, unescaped delimiter that is not nested inside
/// parentheses. Segments are returned raw (quotes and escapes intact) so that
/// callers can split them again before unquoting.
pub(crate) fn split_raw(input: &str, delimiter: char) -> Result<Vec<&str>, ScanError> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut quoted = false;
    let mut chars = input.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next().ok_or(ScanError::DanglingEscape)?;
            }
            '"' => quoted = !quoted,
            _ if quoted => {}
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or(ScanError::UnbalancedParens)?;
            }
            c if c == delimiter && depth == 0 => {
                segments.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    if quoted {
        return Err(ScanError::UnterminatedQuote);
    }
    if depth != 0 {
        return Err(ScanError::UnbalancedParens);
    }

    segments.push(&input[start..]);
    Ok(segments)
}

/// Remove quotes and resolve escapes in a raw segment.
pub(crate) fn unquote(raw: &str) -> Result<Word, ScanError> {
    let mut word = Word::default();
    let mut quoted = false;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                word.text.push(chars.next().ok_or(ScanError::DanglingEscape)?);
                word.literal = true;
            }
            '"' => {
                quoted = !quoted;
                word.literal = true;
            }
            c => word.text.push(c),
        }
    }

    if quoted {
        return Err(ScanError::UnterminatedQuote);
    }
    Ok(word)
}

/// If `raw` is a single unquoted parenthesized group, return its contents.
pub(crate) fn strip_parens(raw: &str) -> Option<&str> {
    let inner = raw.strip_prefix('(')?.strip_suffix(')')?;
    // "(a)(b)" starts and ends with parens but is not one group
    let balanced = split_raw(inner, '\u{0}').is_ok();
    balanced.then_some(inner)
}
