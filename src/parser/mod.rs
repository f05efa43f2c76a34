//! C2: Parser — recursive-descent parser producing the raw AST (spec.md §4.2).
//!
//! SQL bodies (after `CREATE [OR REPLACE] TABLE <name> ... AS` and after
//! `EXPORT`'s `SELECT`) are captured verbatim by the lexer's raw-scan mode
//! (see [`crate::lexer::Lexer::scan_sql_until_semicolon`] /
//! `scan_sql_until_keyword`) up to the matching terminator; the parser never
//! tokenizes or interprets SQL itself.

mod expr;

use crate::ast::{parse_param_map, Expr, LoadMode, Node, ParamMap};
use crate::errors::{Result, SqlFlowError};
use crate::lexer::{Keyword, Lexer, Token, TokenKind};

/// Parses a complete `.sf` source into a raw (unresolved) list of nodes.
pub fn parse(source: &str) -> Result<Vec<Node>> {
    let mut parser = Parser::new(source);
    parser.parse_statements(&[])
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Option<Token>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lexer: Lexer::new(source),
            lookahead: None,
        }
    }

    fn peek(&mut self) -> Result<&Token> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.lexer.next_token()?);
        }
        Ok(self.lookahead.as_ref().unwrap())
    }

    fn advance(&mut self) -> Result<Token> {
        if let Some(tok) = self.lookahead.take() {
            return Ok(tok);
        }
        self.lexer.next_token()
    }

    fn expect_punct(&mut self, punct: &str) -> Result<Token> {
        let tok = self.advance()?;
        if tok.kind == TokenKind::Punct && tok.text == punct {
            Ok(tok)
        } else {
            Err(self.unexpected(&tok, vec![punct.to_string()]))
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<Token> {
        let tok = self.advance()?;
        if tok.is_keyword(kw) {
            Ok(tok)
        } else {
            Err(self.unexpected(&tok, vec![kw.to_string()]))
        }
    }

    fn expect_identifier(&mut self) -> Result<Token> {
        let tok = self.advance()?;
        if tok.kind == TokenKind::Identifier {
            Ok(tok)
        } else {
            Err(self.unexpected(&tok, vec!["identifier".to_string()]))
        }
    }

    fn expect_string(&mut self) -> Result<Token> {
        let tok = self.advance()?;
        if tok.kind == TokenKind::String {
            Ok(tok)
        } else {
            Err(self.unexpected(&tok, vec!["string literal".to_string()]))
        }
    }

    fn expect_json(&mut self) -> Result<ParamMap> {
        let tok = self.advance()?;
        if tok.kind == TokenKind::JsonLiteral {
            parse_param_map(&tok.text)
        } else {
            Err(self.unexpected(&tok, vec!["JSON literal".to_string()]))
        }
    }

    fn unexpected(&self, tok: &Token, expected: Vec<String>) -> SqlFlowError {
        SqlFlowError::ParseError {
            line: tok.line,
            expected,
            found: tok.to_string(),
        }
    }

    /// Parses statements until EOF or, inside a conditional body, until one
    /// of `stop_keywords` is seen as the next token (not consumed).
    fn parse_statements(&mut self, stop_keywords: &[Keyword]) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            let tok = self.peek()?.clone();
            if tok.is_eof() {
                break;
            }
            if let TokenKind::Keyword(kw) = tok.kind {
                if stop_keywords.contains(&kw) {
                    break;
                }
            }
            nodes.push(self.parse_statement()?);
        }
        Ok(nodes)
    }

    fn parse_statement(&mut self) -> Result<Node> {
        let tok = self.peek()?.clone();
        let node = match &tok.kind {
            TokenKind::Keyword(Keyword::Set) => self.parse_set(),
            TokenKind::Keyword(Keyword::Source) => self.parse_source(),
            TokenKind::Keyword(Keyword::Load) => self.parse_load(),
            TokenKind::Keyword(Keyword::Create) => self.parse_create_table(),
            TokenKind::Keyword(Keyword::Export) => self.parse_export(),
            TokenKind::Keyword(Keyword::Include) => self.parse_include(),
            TokenKind::Keyword(Keyword::If) => self.parse_conditional(),
            _ => Err(self.unexpected(
                &tok,
                vec![
                    "SET".into(),
                    "SOURCE".into(),
                    "LOAD".into(),
                    "CREATE".into(),
                    "EXPORT".into(),
                    "INCLUDE".into(),
                    "IF".into(),
                ],
            )),
        }?;
        self.expect_punct(";")?;
        Ok(node)
    }

    fn parse_set(&mut self) -> Result<Node> {
        let line = self.expect_keyword(Keyword::Set)?.line;
        let name = self.expect_identifier()?.text;
        self.expect_punct("=")?;
        let value_tok = self.advance()?;
        let expression = match value_tok.kind {
            TokenKind::String => value_tok.text,
            TokenKind::Number => value_tok.text,
            TokenKind::Identifier => value_tok.text,
            _ => return Err(self.unexpected(&value_tok, vec!["value".into()])),
        };
        Ok(Node::SetVar {
            line,
            name,
            expression,
        })
    }

    fn parse_source(&mut self) -> Result<Node> {
        let line = self.expect_keyword(Keyword::Source)?.line;
        let name = self.expect_identifier()?.text;
        self.expect_keyword(Keyword::Type)?;
        let connector_type = self.expect_identifier()?.text.to_ascii_uppercase();
        self.expect_keyword(Keyword::Params)?;
        let params = self.expect_json()?;
        Ok(Node::SourceDecl {
            line,
            name,
            connector_type,
            params,
        })
    }

    fn parse_load(&mut self) -> Result<Node> {
        let line = self.expect_keyword(Keyword::Load)?.line;
        let target_table = self.expect_identifier()?.text;
        self.expect_keyword(Keyword::From)?;
        let source_name = self.expect_identifier()?.text;
        let (mode, upsert_keys) = self.parse_optional_mode()?;
        Ok(Node::LoadStmt {
            line,
            target_table,
            source_name,
            mode,
            upsert_keys,
        })
    }

    /// Parses an optional `MODE { REPLACE | APPEND | UPSERT KEY c[,c] |
    /// MERGE MERGE_KEYS c[,c] }` clause, defaulting to REPLACE.
    fn parse_optional_mode(&mut self) -> Result<(LoadMode, Vec<String>)> {
        if !self.peek()?.is_keyword(Keyword::Mode) {
            return Ok((LoadMode::Replace, Vec::new()));
        }
        self.expect_keyword(Keyword::Mode)?;
        let kw_tok = self.advance()?;
        match kw_tok.kind {
            TokenKind::Keyword(Keyword::Replace) => Ok((LoadMode::Replace, Vec::new())),
            TokenKind::Keyword(Keyword::Append) => Ok((LoadMode::Append, Vec::new())),
            TokenKind::Keyword(Keyword::Upsert) => {
                self.expect_keyword(Keyword::Key)?;
                let keys = self.parse_column_list()?;
                Ok((LoadMode::Upsert, keys))
            }
            TokenKind::Keyword(Keyword::Merge) => {
                tracing::warn!(
                    "MODE MERGE is a legacy spelling of MODE UPSERT; prefer UPSERT KEY"
                );
                self.expect_keyword(Keyword::MergeKeys)?;
                let keys = self.parse_column_list()?;
                Ok((LoadMode::Upsert, keys))
            }
            _ => Err(self.unexpected(
                &kw_tok,
                vec!["REPLACE".into(), "APPEND".into(), "UPSERT".into(), "MERGE".into()],
            )),
        }
    }

    fn parse_column_list(&mut self) -> Result<Vec<String>> {
        let mut cols = vec![self.expect_identifier()?.text];
        while self.peek()?.kind == TokenKind::Punct && self.peek()?.text == "," {
            self.advance()?;
            cols.push(self.expect_identifier()?.text);
        }
        Ok(cols)
    }

    fn parse_create_table(&mut self) -> Result<Node> {
        let line = self.expect_keyword(Keyword::Create)?.line;
        let mut is_replace = false;
        if self.peek()?.is_keyword(Keyword::Or) {
            self.advance()?;
            self.expect_keyword(Keyword::Replace)?;
            is_replace = true;
        }
        self.expect_keyword(Keyword::Table)?;
        let target_table = self.expect_identifier()?.text;
        let (mode, upsert_keys) = self.parse_optional_mode()?;
        self.expect_keyword(Keyword::As)?;
        let sql_body = self.lexer.scan_sql_until_semicolon()?;
        Ok(Node::SqlBlock {
            line,
            target_table,
            sql_body,
            is_replace,
            mode,
            upsert_keys,
        })
    }

    fn parse_export(&mut self) -> Result<Node> {
        let line = self.expect_keyword(Keyword::Export)?.line;
        let select_body = self.lexer.scan_sql_until_keyword("TO")?;
        self.expect_keyword(Keyword::To)?;
        let destination_uri = self.expect_string()?.text;
        self.expect_keyword(Keyword::Type)?;
        let connector_type = self.expect_identifier()?.text.to_ascii_uppercase();
        let options = if self.peek()?.is_keyword(Keyword::Options) {
            self.advance()?;
            self.expect_json()?
        } else {
            ParamMap::new()
        };
        Ok(Node::Export {
            line,
            select_body,
            destination_uri,
            connector_type,
            options,
        })
    }

    fn parse_include(&mut self) -> Result<Node> {
        let line = self.expect_keyword(Keyword::Include)?.line;
        let path = self.expect_string()?.text;
        let alias = if self.peek()?.is_keyword(Keyword::As) {
            self.advance()?;
            Some(self.expect_identifier()?.text)
        } else {
            None
        };
        Ok(Node::Include { line, path, alias })
    }

    fn parse_conditional(&mut self) -> Result<Node> {
        let line = self.expect_keyword(Keyword::If)?.line;
        let mut branches = Vec::new();

        let condition = expr::parse_expr(self)?;
        self.expect_keyword(Keyword::Then)?;
        let body = self.parse_statements(&[Keyword::Elseif, Keyword::Else, Keyword::End])?;
        branches.push((condition, body));

        while self.peek()?.is_keyword(Keyword::Elseif) {
            self.advance()?;
            let condition = expr::parse_expr(self)?;
            self.expect_keyword(Keyword::Then)?;
            let body = self.parse_statements(&[Keyword::Elseif, Keyword::Else, Keyword::End])?;
            branches.push((condition, body));
        }

        let else_body = if self.peek()?.is_keyword(Keyword::Else) {
            self.advance()?;
            self.parse_statements(&[Keyword::End])?
        } else {
            Vec::new()
        };

        self.expect_keyword(Keyword::End)?;
        if self.peek()?.is_keyword(Keyword::If) {
            self.advance()?;
        }

        Ok(Node::Conditional {
            line,
            branches,
            else_body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_source_and_load() {
        let src = r#"
            SOURCE s TYPE CSV PARAMS {"path": "/t/a.csv", "has_header": true};
            LOAD t FROM s;
        "#;
        let nodes = parse(src).unwrap();
        assert_eq!(nodes.len(), 2);
        match &nodes[0] {
            Node::SourceDecl {
                name,
                connector_type,
                params,
                ..
            } => {
                assert_eq!(name, "s");
                assert_eq!(connector_type, "CSV");
                assert_eq!(params.get("path").unwrap().as_str(), Some("/t/a.csv"));
            }
            other => panic!("expected SourceDecl, got {other:?}"),
        }
        match &nodes[1] {
            Node::LoadStmt {
                target_table,
                source_name,
                mode,
                ..
            } => {
                assert_eq!(target_table, "t");
                assert_eq!(source_name, "s");
                assert_eq!(*mode, LoadMode::Replace);
            }
            other => panic!("expected LoadStmt, got {other:?}"),
        }
    }

    #[test]
    fn parses_upsert_mode_with_keys() {
        let src = "LOAD t FROM s MODE UPSERT KEY id, email;";
        let nodes = parse(src).unwrap();
        match &nodes[0] {
            Node::LoadStmt {
                mode, upsert_keys, ..
            } => {
                assert_eq!(*mode, LoadMode::Upsert);
                assert_eq!(upsert_keys, &vec!["id".to_string(), "email".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_legacy_merge_mode() {
        let src = "LOAD t FROM s MODE MERGE MERGE_KEYS id;";
        let nodes = parse(src).unwrap();
        match &nodes[0] {
            Node::LoadStmt { mode, upsert_keys, .. } => {
                assert_eq!(*mode, LoadMode::Upsert);
                assert_eq!(upsert_keys, &vec!["id".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn captures_create_table_sql_verbatim() {
        let src = "CREATE OR REPLACE TABLE agg AS SELECT a, b * 2 AS doubled FROM raw WHERE a > 0;";
        let nodes = parse(src).unwrap();
        match &nodes[0] {
            Node::SqlBlock {
                target_table,
                sql_body,
                is_replace,
                ..
            } => {
                assert_eq!(target_table, "agg");
                assert!(is_replace);
                assert_eq!(sql_body, "SELECT a, b * 2 AS doubled FROM raw WHERE a > 0");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn captures_export_select_verbatim_up_to_to() {
        let src = r#"EXPORT SELECT * FROM t WHERE x != 'a' TO "s3://bucket/out.csv" TYPE S3 OPTIONS {"format":"csv"};"#;
        let nodes = parse(src).unwrap();
        match &nodes[0] {
            Node::Export {
                select_body,
                destination_uri,
                connector_type,
                options,
                ..
            } => {
                assert_eq!(select_body, "SELECT * FROM t WHERE x != 'a'");
                assert_eq!(destination_uri, "s3://bucket/out.csv");
                assert_eq!(connector_type, "S3");
                assert_eq!(options.get("format").unwrap().as_str(), Some("csv"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_include_with_alias() {
        let src = r#"INCLUDE "common/sources.sf" AS common;"#;
        let nodes = parse(src).unwrap();
        match &nodes[0] {
            Node::Include { path, alias, .. } => {
                assert_eq!(path, "common/sources.sf");
                assert_eq!(alias.as_deref(), Some("common"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_if_elseif_else_end_if() {
        let src = r#"
            IF env == "prod" THEN
                SET x = "p";
            ELSEIF env == "staging" THEN
                SET x = "s";
            ELSE
                SET x = "d";
            END IF;
        "#;
        let nodes = parse(src).unwrap();
        match &nodes[0] {
            Node::Conditional {
                branches,
                else_body,
                ..
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(else_body.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_error_reports_position_and_expected() {
        let src = "LOAD t FROM;";
        let err = parse(src).unwrap_err();
        match err {
            SqlFlowError::ParseError { line, .. } => assert_eq!(line, 1),
            other => panic!("expected ParseError, got {other:?}"),
        }
    }
}
