#![forbid(unsafe_code)]

use cnd_ast::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Keywords
    KwDimension,

    // A whole preprocessor directive, continuation lines included.
    Directive,

    // Punctuation the scanner cares about
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Colon,
    Question,
    Dot,
    Arrow,

    // Arithmetic understood by the bound/index expression parser
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,

    // Every other C operator, kept as written
    Op(String),

    Eof,

    // Literals / identifiers
    Ident(String),
    Number(String),
    String(String),
    Char(String),
}

impl TokenKind {
    pub fn is_open(&self) -> bool {
        matches!(self, TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace)
    }

    pub fn is_close(&self) -> bool {
        matches!(self, TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace)
    }
}
