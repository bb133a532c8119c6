#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use cnd_ast::{span_between, Span};
use logos::Logos;
use miette::Diagnostic;
use thiserror::Error;

use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(cnd::lex))]
#[allow(unused_assignments)]
pub struct LexError {
    pub message: String,
    #[label]
    pub span: Span,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f\x0B]+")]
#[logos(skip r"\\\r?\n")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
enum RawToken {
    #[token("dimension")]
    KwDimension,

    // Comments that never close match only their opener.
    #[token("/*")]
    UnterminatedComment,

    #[regex(r"#([^\n\\]|\\[^\r\n]|\\\r?\n)*")]
    Directive,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token("?")]
    Question,
    #[token(".")]
    Dot,
    #[token("->")]
    Arrow,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,

    #[regex(r"<<=|>>=|<<|>>|<=|>=|==|!=|&&|\|\||[-+*/%&|^]=|[<>=!~&|^]|\.\.\.")]
    Op,

    #[regex(r"[0-9]([0-9a-zA-Z_.]|[eEpP][+-])*")]
    #[regex(r"\.[0-9]([0-9a-zA-Z_.]|[eEpP][+-])*")]
    Number,

    #[regex(r#""([^"\\\n]|\\[^\r\n]|\\\r?\n)*""#)]
    String,

    #[regex(r"'([^'\\\n]|\\[^\r\n])*'")]
    Char,

    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*")]
    Ident,
}

pub struct Lexer<'a> {
    src: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src }
    }

    pub fn lex(&self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut lex = RawToken::lexer(self.src);

        while let Some(raw) = lex.next() {
            let range = lex.span();
            let span = span_between(range.start, range.end);
            let text = lex.slice();

            let kind = match raw {
                Ok(RawToken::KwDimension) => TokenKind::KwDimension,
                Ok(RawToken::UnterminatedComment) => {
                    return Err(LexError {
                        message: "unterminated block comment".to_string(),
                        span,
                    });
                }
                Ok(RawToken::Directive) => TokenKind::Directive,

                Ok(RawToken::LParen) => TokenKind::LParen,
                Ok(RawToken::RParen) => TokenKind::RParen,
                Ok(RawToken::LBracket) => TokenKind::LBracket,
                Ok(RawToken::RBracket) => TokenKind::RBracket,
                Ok(RawToken::LBrace) => TokenKind::LBrace,
                Ok(RawToken::RBrace) => TokenKind::RBrace,
                Ok(RawToken::Comma) => TokenKind::Comma,
                Ok(RawToken::Semi) => TokenKind::Semi,
                Ok(RawToken::Colon) => TokenKind::Colon,
                Ok(RawToken::Question) => TokenKind::Question,
                Ok(RawToken::Dot) => TokenKind::Dot,
                Ok(RawToken::Arrow) => TokenKind::Arrow,

                Ok(RawToken::Plus) => TokenKind::Plus,
                Ok(RawToken::Minus) => TokenKind::Minus,
                Ok(RawToken::Star) => TokenKind::Star,
                Ok(RawToken::Slash) => TokenKind::Slash,
                Ok(RawToken::Percent) => TokenKind::Percent,
                Ok(RawToken::PlusPlus) => TokenKind::PlusPlus,
                Ok(RawToken::MinusMinus) => TokenKind::MinusMinus,
                Ok(RawToken::Op) => TokenKind::Op(text.to_string()),

                Ok(RawToken::Number) => TokenKind::Number(text.to_string()),
                Ok(RawToken::String) => TokenKind::String(text.to_string()),
                Ok(RawToken::Char) => TokenKind::Char(text.to_string()),
                Ok(RawToken::Ident) => TokenKind::Ident(text.to_string()),

                Err(_) => {
                    let message = if text.starts_with('"') || text.starts_with('\'') {
                        "unterminated literal".to_string()
                    } else {
                        format!("unexpected character '{text}'")
                    };
                    return Err(LexError { message, span });
                }
            };

            tokens.push(Token { kind, span });
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            span: span_between(self.src.len(), self.src.len()),
        });

        Ok(tokens)
    }
}
