//! Character-level scanning used by [`super::Lexer`].

use super::lex_error;
use super::token::{Keyword, Token, TokenKind};
use crate::errors::Result;

pub(crate) struct Scanner<'a> {
    chars: Vec<char>,
    source: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            source,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('-') if self.peek_at(1) == Some('-') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments();

        let (line, column) = (self.line, self.column);

        let Some(c) = self.peek() else {
            return Ok(Token::new(TokenKind::Eof, "", line, column));
        };

        if c == '"' || c == '\'' {
            return self.scan_string(line, column);
        }

        if c == '{' || c == '[' {
            return self.scan_json_literal(line, column);
        }

        if c.is_ascii_digit() {
            return self.scan_number(line, column);
        }

        if c.is_alphabetic() || c == '_' {
            return self.scan_word(line, column);
        }

        self.scan_punct(line, column)
    }

    fn scan_string(&mut self, line: usize, column: usize) -> Result<Token> {
        let quote = self.advance().unwrap();
        let mut text = String::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => {
                    return Ok(Token::new(TokenKind::String, text, line, column));
                }
                Some('\\') => {
                    // Keep the escape verbatim; the resolver/serde_json layers
                    // handle un-escaping where it matters (e.g. inside
                    // JSON literals). This keeps `${...}` byte-identical.
                    text.push('\\');
                    if let Some(next) = self.advance() {
                        text.push(next);
                    }
                }
                Some(c) => text.push(c),
                None => {
                    return Err(lex_error(line, column, "unterminated string literal"));
                }
            }
        }
    }

    /// Scans a `{...}` or `[...]` literal as one balanced-bracket token,
    /// respecting nested brackets and quoted strings so that a `}` or `]`
    /// inside a string value doesn't terminate the literal early.
    fn scan_json_literal(&mut self, line: usize, column: usize) -> Result<Token> {
        let start_pos = self.char_byte_offset(self.pos);
        let open = self.advance().unwrap();
        let close = if open == '{' { '}' } else { ']' };
        let mut depth = 1usize;

        loop {
            match self.peek() {
                Some('"') | Some('\'') => {
                    let quote = self.advance().unwrap();
                    loop {
                        match self.advance() {
                            Some('\\') => {
                                self.advance();
                            }
                            Some(c) if c == quote => break,
                            Some(_) => {}
                            None => {
                                return Err(lex_error(
                                    line,
                                    column,
                                    "unterminated string inside JSON literal",
                                ));
                            }
                        }
                    }
                }
                Some(c) if c == open => {
                    depth += 1;
                    self.advance();
                }
                Some(c) if c == close => {
                    depth -= 1;
                    self.advance();
                    if depth == 0 {
                        let end_pos = self.char_byte_offset(self.pos);
                        let text = self.source[start_pos..end_pos].to_string();
                        return Ok(Token::new(TokenKind::JsonLiteral, text, line, column));
                    }
                }
                Some(_) => {
                    self.advance();
                }
                None => {
                    return Err(lex_error(line, column, "unterminated JSON literal"));
                }
            }
        }
    }

    fn char_byte_offset(&self, char_index: usize) -> usize {
        self.chars
            .iter()
            .take(char_index)
            .map(|c| c.len_utf8())
            .sum()
    }

    /// Scans raw text up to (not including) the next top-level `;`,
    /// skipping over quoted strings so a `;` inside a string literal
    /// doesn't terminate early. Used to capture SQL bodies verbatim
    /// (spec.md §4.2: "captured verbatim up to the matching TO/;").
    pub fn scan_verbatim_until_semicolon(&mut self) -> Result<String> {
        self.skip_whitespace_and_comments();
        let start = self.char_byte_offset(self.pos);
        loop {
            match self.peek() {
                Some(';') | None => {
                    let end = self.char_byte_offset(self.pos);
                    return Ok(self.source[start..end].trim().to_string());
                }
                Some('"') | Some('\'') => {
                    let quote = self.advance().unwrap();
                    while let Some(c) = self.advance() {
                        if c == '\\' {
                            self.advance();
                        } else if c == quote {
                            break;
                        }
                    }
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    /// Scans raw text up to (not including) the next top-level occurrence
    /// of `keyword` as a whole word, case-insensitively, skipping quoted
    /// strings. Leaves the cursor positioned right before the keyword so
    /// normal lexing resumes with it as the next token.
    pub fn scan_verbatim_until_keyword(&mut self, keyword: &str) -> Result<String> {
        self.skip_whitespace_and_comments();
        let start = self.char_byte_offset(self.pos);
        loop {
            match self.peek() {
                None => {
                    return Err(lex_error(
                        self.line,
                        self.column,
                        format!("unexpected end of input while scanning for '{keyword}'"),
                    ));
                }
                Some('"') | Some('\'') => {
                    let quote = self.advance().unwrap();
                    while let Some(c) = self.advance() {
                        if c == '\\' {
                            self.advance();
                        } else if c == quote {
                            break;
                        }
                    }
                }
                Some(c) if c.is_alphabetic() || c == '_' => {
                    let word_start = self.char_byte_offset(self.pos);
                    while let Some(c) = self.peek() {
                        if c.is_alphanumeric() || c == '_' {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    let word_end = self.char_byte_offset(self.pos);
                    let word = &self.source[word_start..word_end];
                    if word.eq_ignore_ascii_case(keyword) {
                        return Ok(self.source[start..word_start].trim().to_string());
                    }
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    fn scan_number(&mut self, line: usize, column: usize) -> Result<Token> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Ok(Token::new(TokenKind::Number, text, line, column))
    }

    fn scan_word(&mut self, line: usize, column: usize) -> Result<Token> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = match Keyword::from_str(&text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Identifier,
        };
        Ok(Token::new(kind, text, line, column))
    }

    fn scan_punct(&mut self, line: usize, column: usize) -> Result<Token> {
        let c = self.advance().unwrap();
        let two_char = |scanner: &mut Self, second: char, combined: &str| -> Option<Token> {
            if scanner.peek() == Some(second) {
                scanner.advance();
                Some(Token::new(TokenKind::Punct, combined, line, column))
            } else {
                None
            }
        };

        let token = match c {
            '=' => two_char(self, '=', "==").unwrap_or_else(|| {
                Token::new(TokenKind::Punct, "=", line, column)
            }),
            '!' => {
                if let Some(t) = two_char(self, '=', "!=") {
                    t
                } else {
                    return Err(lex_error(line, column, "unexpected character '!'"));
                }
            }
            '<' => two_char(self, '=', "<=").unwrap_or_else(|| {
                Token::new(TokenKind::Punct, "<", line, column)
            }),
            '>' => two_char(self, '=', ">=").unwrap_or_else(|| {
                Token::new(TokenKind::Punct, ">", line, column)
            }),
            ';' | ',' | '(' | ')' | '.' | ':' => {
                Token::new(TokenKind::Punct, c.to_string(), line, column)
            }
            other => {
                return Err(lex_error(
                    line,
                    column,
                    format!("unknown character '{other}'"),
                ));
            }
        };
        Ok(token)
    }
}
