#![forbid(unsafe_code)]

mod arith;
mod error;
mod fmt;
mod scanner;

use cnd_lex::Lexer;

pub use arith::{parse_int_expr, parse_int_literal};
pub use error::ParseError;
pub use fmt::format_fragments;
pub use scanner::Scanner;

/// Lex and scan `src`, keeping the error's labels for rendering.
pub fn scan_source(src: &str) -> miette::Result<cnd_ast::Unit> {
    let tokens = Lexer::new(src).lex()?;
    let mut scanner = Scanner::new(src, &tokens);
    Ok(scanner.scan()?)
}
