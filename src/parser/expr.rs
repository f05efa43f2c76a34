//! Conditional-folding expression grammar (spec.md §4.3):
//! `==`, `!=`, `AND`, `OR`, `NOT`, parenthesization, string/number literals,
//! variable references.
//!
//! Precedence, loosest to tightest: `OR` > `AND` > `NOT` > `==`/`!=` > atom.

use super::Parser;
use crate::ast::Expr;
use crate::errors::Result;
use crate::lexer::{Keyword, TokenKind};

pub(super) fn parse_expr(parser: &mut Parser) -> Result<Expr> {
    parse_or(parser)
}

fn parse_or(parser: &mut Parser) -> Result<Expr> {
    let mut left = parse_and(parser)?;
    while parser.peek()?.is_keyword(Keyword::Or) {
        parser.advance()?;
        let right = parse_and(parser)?;
        left = Expr::Or(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_and(parser: &mut Parser) -> Result<Expr> {
    let mut left = parse_unary(parser)?;
    while parser.peek()?.is_keyword(Keyword::And) {
        parser.advance()?;
        let right = parse_unary(parser)?;
        left = Expr::And(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_unary(parser: &mut Parser) -> Result<Expr> {
    if parser.peek()?.is_keyword(Keyword::Not) {
        parser.advance()?;
        let inner = parse_unary(parser)?;
        return Ok(Expr::Not(Box::new(inner)));
    }
    parse_equality(parser)
}

fn parse_equality(parser: &mut Parser) -> Result<Expr> {
    let left = parse_atom(parser)?;
    let tok = parser.peek()?.clone();
    if tok.kind == TokenKind::Punct && (tok.text == "==" || tok.text == "!=") {
        parser.advance()?;
        let right = parse_atom(parser)?;
        return Ok(if tok.text == "==" {
            Expr::Eq(Box::new(left), Box::new(right))
        } else {
            Expr::Ne(Box::new(left), Box::new(right))
        });
    }
    Ok(left)
}

fn parse_atom(parser: &mut Parser) -> Result<Expr> {
    let tok = parser.advance()?;
    match tok.kind {
        TokenKind::String => Ok(Expr::StringLit(tok.text)),
        TokenKind::Number => Ok(Expr::NumberLit(tok.text.parse().unwrap_or(0.0))),
        TokenKind::Identifier => Ok(Expr::Var(tok.text)),
        TokenKind::Punct if tok.text == "(" => {
            let inner = parse_or(parser)?;
            parser.expect_punct(")")?;
            Ok(inner)
        }
        _ => Err(parser.unexpected(
            &tok,
            vec![
                "string literal".into(),
                "number".into(),
                "identifier".into(),
                "(".into(),
            ],
        )),
    }
}
