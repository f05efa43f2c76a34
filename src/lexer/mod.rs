//! C1: Lexer — token stream from `.sf` source text (spec.md §4.1).
//!
//! Produces tokens from UTF-8 input via a lazy, `Iterator`-based scan.
//! Strings preserve inner `${...}` verbatim; substitution happens later in
//! the resolver (C3). JSON-like object/array literals (used inside
//! `PARAMS`/`OPTIONS` blocks) are captured as one balanced-bracket token and
//! handed to `serde_json` by the parser.

mod scanner;
pub mod token;

pub use token::{Keyword, Token, TokenKind};

use crate::errors::{Result, SqlFlowError};
use scanner::Scanner;

/// Lexes `source` into a complete token vector, ending with `Eof`.
///
/// Implemented eagerly over the scanner's lazy iteration for caller
/// convenience; the scanner itself advances one token at a time and can be
/// used directly for a truly lazy pull (see [`Lexer`]).
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).collect()
}

/// A lazy, finite iterator over a `.sf` source's tokens.
pub struct Lexer<'a> {
    scanner: Scanner<'a>,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            scanner: Scanner::new(source),
            done: false,
        }
    }

    /// Pulls the next token directly (non-[`Iterator`] call used by the
    /// parser, which needs lookahead control the `Iterator` trait doesn't
    /// give).
    pub fn next_token(&mut self) -> Result<Token> {
        self.scanner.next_token()
    }

    /// Captures a SQL body verbatim up to the next top-level `;` (spec.md
    /// §4.2, used for `CREATE TABLE AS`).
    pub fn scan_sql_until_semicolon(&mut self) -> Result<String> {
        self.scanner.scan_verbatim_until_semicolon()
    }

    /// Captures a SQL body verbatim up to the next top-level `keyword`
    /// (spec.md §4.2, used for `EXPORT ... SELECT ... TO`).
    pub fn scan_sql_until_keyword(&mut self, keyword: &str) -> Result<String> {
        self.scanner.scan_verbatim_until_keyword(keyword)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.scanner.next_token() {
            Ok(token) => {
                if token.is_eof() {
                    self.done = true;
                }
                Some(Ok(token))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

pub(crate) fn lex_error(line: usize, column: usize, message: impl Into<String>) -> SqlFlowError {
    SqlFlowError::LexError {
        line,
        column,
        message: message.into(),
    }
}
