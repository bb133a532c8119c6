#![forbid(unsafe_code)]

use cnd_ast::{BinOp, Expr};
use cnd_lex::{Token, TokenKind};

/// Parse a token run as integer arithmetic over literals, identifiers, unary
/// minus, `+ - * / %` and parentheses. Anything else (calls, member access,
/// casts, other operators) yields `None` and the caller keeps the text as is.
pub fn parse_int_expr(tokens: &[Token]) -> Option<Expr> {
    let mut p = ArithParser { tokens, idx: 0 };
    let e = p.parse_add_expr()?;
    if p.idx == tokens.len() { Some(e) } else { None }
}

/// Value of a C integer literal (decimal, octal, hex, GNU binary), with any
/// `u`/`l` suffix.
pub fn parse_int_literal(text: &str) -> Option<i64> {
    let body = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let body: String = body.chars().filter(|c| *c != '\'').collect();
    if body.is_empty() {
        return None;
    }
    let (digits, radix) = if let Some(rest) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        (rest, 16)
    } else if let Some(rest) = body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")) {
        (rest, 2)
    } else if body.len() > 1 && body.starts_with('0') {
        (&body[1..], 8)
    } else {
        (body.as_str(), 10)
    };
    if digits.is_empty() {
        return None;
    }
    i64::from_str_radix(digits, radix).ok()
}

struct ArithParser<'a> {
    tokens: &'a [Token],
    idx: usize,
}

impl ArithParser<'_> {
    fn parse_add_expr(&mut self) -> Option<Expr> {
        let mut left = self.parse_mul_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            self.idx += 1;
            let right = self.parse_mul_expr()?;
            left = Expr::binary(op, left, right);
        }
        Some(left)
    }

    fn parse_mul_expr(&mut self) -> Option<Expr> {
        let mut left = self.parse_unary_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                Some(TokenKind::Percent) => BinOp::Rem,
                _ => break,
            };
            self.idx += 1;
            let right = self.parse_unary_expr()?;
            left = Expr::binary(op, left, right);
        }
        Some(left)
    }

    fn parse_unary_expr(&mut self) -> Option<Expr> {
        match self.peek_kind()? {
            TokenKind::Minus => {
                self.idx += 1;
                Some(Expr::neg(self.parse_unary_expr()?))
            }
            TokenKind::Plus => {
                self.idx += 1;
                self.parse_unary_expr()
            }
            _ => self.parse_primary_expr(),
        }
    }

    fn parse_primary_expr(&mut self) -> Option<Expr> {
        let tok = self.tokens.get(self.idx)?;
        self.idx += 1;
        match &tok.kind {
            TokenKind::Number(text) => parse_int_literal(text).map(Expr::int),
            TokenKind::Ident(name) => Some(Expr::var(name.clone())),
            TokenKind::LParen => {
                let inner = self.parse_add_expr()?;
                match self.peek_kind() {
                    Some(TokenKind::RParen) => {
                        self.idx += 1;
                        Some(inner)
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.idx).map(|t| &t.kind)
    }
}
