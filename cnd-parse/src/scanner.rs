#![forbid(unsafe_code)]

use std::collections::HashSet;

use cnd_ast::{
    span_between, span_end, span_start, Arg, AxisBounds, AxisSyntax, Delim, DimensionDecl,
    Fragment, HelperCall, HelperKind, Ident, Span, Spanned, Subscript, Unit,
};
use cnd_lex::{Token, TokenKind};
use tracing::trace;

use crate::arith::parse_int_expr;
use crate::error::ParseError;

/// Splits a token stream into passthrough text and translation sites.
///
/// A site is a `dimension` declaration, a subscript on an identifier, a helper
/// invocation, or a brace that opens or closes a lexical scope. Whether a
/// subscript actually gets rewritten is decided later against the live shape
/// registry; the scanner only classifies.
pub struct Scanner<'a> {
    src: &'a str,
    tokens: &'a [Token],
    idx: usize,
    dimensioned: HashSet<String>,
}

type TokRange = (usize, usize);

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str, tokens: &'a [Token]) -> Self {
        let dimensioned = collect_dimensioned_names(tokens);
        Self {
            src,
            tokens,
            idx: 0,
            dimensioned,
        }
    }

    pub fn scan(&mut self) -> Result<Unit, ParseError> {
        self.idx = 0;
        let stop = self.tokens.len();
        let fragments = self.scan_until(stop, 0, self.src.len())?;
        Ok(Unit { fragments })
    }

    fn scan_until(
        &mut self,
        stop: usize,
        start_byte: usize,
        end_byte: usize,
    ) -> Result<Vec<Fragment>, ParseError> {
        let mut out = Vec::new();
        let mut text_start = start_byte;

        while self.idx < stop {
            let Some(fragment) = self.classify()? else {
                self.idx += 1;
                continue;
            };
            let span = fragment.span();
            if span_start(span) > text_start {
                out.push(Fragment::Text(span_between(text_start, span_start(span))));
            }
            trace!(site = ?span, "scanned site");
            text_start = span_end(span);
            out.push(fragment);
        }

        if end_byte > text_start {
            out.push(Fragment::Text(span_between(text_start, end_byte)));
        }
        Ok(out)
    }

    /// Recognize a site at the current token. On success the cursor is left
    /// past the site.
    fn classify(&mut self) -> Result<Option<Fragment>, ParseError> {
        let tokens = self.tokens;
        let tok = &tokens[self.idx];
        match &tok.kind {
            TokenKind::KwDimension => self.parse_declaration().map(|d| Some(Fragment::Declaration(d))),
            TokenKind::LBrace => {
                self.idx += 1;
                Ok(Some(Fragment::ScopeOpen(tok.span)))
            }
            TokenKind::RBrace => {
                self.idx += 1;
                Ok(Some(Fragment::ScopeClose(tok.span)))
            }
            TokenKind::Ident(name) => {
                if self.after_member_access() {
                    return Ok(None);
                }
                match self.peek_kind_n(1) {
                    // The brackets of `double v[n];` size a new object. Their
                    // contents are still scanned for sites.
                    Some(TokenKind::LBracket) if self.is_declarator(self.idx) => Ok(None),
                    Some(TokenKind::LBracket) => {
                        self.parse_subscript(Delim::Bracket).map(|s| Some(Fragment::Subscript(s)))
                    }
                    Some(TokenKind::LParen) => {
                        if let Some(kind) = HelperKind::from_name(name) {
                            self.parse_helper(kind).map(|h| Some(Fragment::Helper(h)))
                        } else if self.dimensioned.contains(name) && !self.is_declarator(self.idx) {
                            self.parse_subscript(Delim::Paren).map(|s| Some(Fragment::Subscript(s)))
                        } else {
                            Ok(None)
                        }
                    }
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    fn parse_declaration(&mut self) -> Result<DimensionDecl, ParseError> {
        let kw = self.expect(TokenKind::KwDimension)?;

        let tokens = self.tokens;
        let layout = match tokens.get(self.idx) {
            Some(Token {
                kind: TokenKind::String(text),
                span,
            }) => {
                self.idx += 1;
                Some(Spanned::new(*span, unquote(text)))
            }
            _ => None,
        };

        let name = self.expect_ident()?;

        let open_idx = self.idx;
        let close_kind = match self.peek_kind() {
            Some(TokenKind::LBracket) => TokenKind::RBracket,
            Some(TokenKind::LParen) => TokenKind::RParen,
            _ => {
                return Err(ParseError {
                    message: format!("expected '[' or '(' after 'dimension {}'", name.node),
                    span: self.peek_span(),
                });
            }
        };
        let close_idx = self.find_matching(open_idx)?;
        if std::mem::discriminant(&self.tokens[close_idx].kind) != std::mem::discriminant(&close_kind) {
            return Err(ParseError {
                message: "mismatched delimiter in dimension declaration".to_string(),
                span: self.tokens[close_idx].span,
            });
        }

        let mut axes = Vec::new();
        for (a, b) in self.split_list(open_idx + 1, close_idx, true) {
            axes.push(self.parse_axis(a, b, open_idx)?);
        }
        if axes.is_empty() {
            return Err(ParseError {
                message: format!("dimension declaration of '{}' has no axes", name.node),
                span: span_between(span_start(kw.span), span_end(self.tokens[close_idx].span)),
            });
        }

        self.idx = close_idx + 1;
        let semi = self.expect(TokenKind::Semi).map_err(|e| ParseError {
            message: "expected ';' after dimension declaration".to_string(),
            span: e.span,
        })?;

        Ok(DimensionDecl {
            span: span_between(span_start(kw.span), span_end(semi.span)),
            name,
            layout,
            axes,
        })
    }

    fn parse_axis(&mut self, a: usize, b: usize, open_idx: usize) -> Result<AxisSyntax, ParseError> {
        if a == b {
            return Err(ParseError {
                message: "empty axis specification".to_string(),
                span: self.gap_span(open_idx, a),
            });
        }
        let span = span_between(span_start(self.tokens[a].span), span_end(self.tokens[b - 1].span));

        let parts = self.split_colons(a, b);
        let bounds = match parts.as_slice() {
            [(x, y)] => AxisBounds::Upper(self.parse_arg(*x, *y)?),
            [lower, upper, rest @ ..] if rest.len() <= 2 => {
                let lower = self.optional_arg(*lower)?;
                let upper = self.optional_arg(*upper)?;
                if lower.is_none() && upper.is_none() {
                    return Err(ParseError {
                        message: "axis specification needs at least one bound".to_string(),
                        span,
                    });
                }
                let step = match rest.first() {
                    Some(r) => self.optional_arg(*r)?,
                    None => None,
                };
                let leading = match rest.get(1) {
                    Some(&(x, y)) if x == y => {
                        return Err(ParseError {
                            message: "empty leading dimension in axis specification".to_string(),
                            span,
                        });
                    }
                    Some(&(x, y)) => Some(self.parse_arg(x, y)?),
                    None => None,
                };
                AxisBounds::Range {
                    lower,
                    upper,
                    step,
                    leading,
                }
            }
            _ => {
                return Err(ParseError {
                    message: "too many ':' in axis specification; expected 'hi', 'lo:hi', \
                              'lo:hi:step' or 'lo:hi:step:leading_dim'"
                        .to_string(),
                    span,
                });
            }
        };
        Ok(AxisSyntax { span, bounds })
    }

    fn optional_arg(&mut self, (a, b): TokRange) -> Result<Option<Arg>, ParseError> {
        if a == b {
            Ok(None)
        } else {
            self.parse_arg(a, b).map(Some)
        }
    }

    fn parse_subscript(&mut self, delim: Delim) -> Result<Subscript, ParseError> {
        let name = self.expect_ident()?;
        let open_idx = self.idx;
        let close_idx = self.find_matching(open_idx)?;

        let mut args = Vec::new();
        let ranges = self.split_list(open_idx + 1, close_idx, true);
        for (a, b) in ranges {
            if a == b {
                return Err(ParseError {
                    message: format!("empty index expression in subscript of '{}'", name.node),
                    span: self.gap_span(open_idx, a),
                });
            }
            args.push(self.parse_arg(a, b)?);
        }

        self.idx = close_idx + 1;
        Ok(Subscript {
            span: span_between(span_start(name.span), span_end(self.tokens[close_idx].span)),
            name,
            delim,
            args,
        })
    }

    fn parse_helper(&mut self, kind: HelperKind) -> Result<HelperCall, ParseError> {
        let name = self.expect_ident()?;
        let open_idx = self.idx;
        let close_idx = self.find_matching(open_idx)?;

        let mut args = Vec::new();
        for (a, b) in self.split_list(open_idx + 1, close_idx, false) {
            if a == b {
                return Err(ParseError {
                    message: format!("empty argument to '{}'", name.node),
                    span: self.gap_span(open_idx, a),
                });
            }
            args.push(self.parse_arg(a, b)?);
        }

        self.idx = close_idx + 1;
        Ok(HelperCall {
            span: span_between(span_start(name.span), span_end(self.tokens[close_idx].span)),
            kind,
            name,
            args,
        })
    }

    fn parse_arg(&mut self, a: usize, b: usize) -> Result<Arg, ParseError> {
        let start = span_start(self.tokens[a].span);
        let end = span_end(self.tokens[b - 1].span);

        let saved = self.idx;
        self.idx = a;
        let fragments = self.scan_until(b, start, end)?;
        self.idx = saved;

        let ident = match &self.tokens[a..b] {
            [Token {
                kind: TokenKind::Ident(name),
                span,
            }] => Some(Ident::new(*span, name.clone())),
            _ => None,
        };

        Ok(Arg {
            span: span_between(start, end),
            fragments,
            expr: parse_int_expr(&self.tokens[a..b]),
            ident,
        })
    }

    /// Index of the delimiter closing the one at `open_idx`.
    fn find_matching(&self, open_idx: usize) -> Result<usize, ParseError> {
        let mut stack: Vec<usize> = Vec::new();
        let mut i = open_idx;
        while let Some(tok) = self.tokens.get(i) {
            if tok.kind.is_open() {
                stack.push(i);
            } else if tok.kind.is_close() {
                let Some(open) = stack.pop() else {
                    return Err(ParseError {
                        message: "unbalanced closing delimiter".to_string(),
                        span: tok.span,
                    });
                };
                if !closes(&self.tokens[open].kind, &tok.kind) {
                    return Err(ParseError {
                        message: "mismatched closing delimiter".to_string(),
                        span: tok.span,
                    });
                }
                if stack.is_empty() {
                    return Ok(i);
                }
            } else if tok.kind == TokenKind::Eof {
                break;
            }
            i += 1;
        }
        Err(ParseError {
            message: "unclosed delimiter".to_string(),
            span: self.tokens[open_idx].span,
        })
    }

    /// Split `[a, b)` at top-level `,` (and `;` when `semis`) into token ranges.
    /// An empty range yields no pieces.
    fn split_list(&self, a: usize, b: usize, semis: bool) -> Vec<TokRange> {
        if a == b {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut depth = 0usize;
        let mut piece = a;
        for i in a..b {
            let kind = &self.tokens[i].kind;
            if kind.is_open() {
                depth += 1;
            } else if kind.is_close() {
                depth = depth.saturating_sub(1);
            } else if depth == 0
                && (*kind == TokenKind::Comma || (semis && *kind == TokenKind::Semi))
            {
                out.push((piece, i));
                piece = i + 1;
            }
        }
        out.push((piece, b));
        out
    }

    /// Split an axis at top-level `:` that do not close a `?`.
    fn split_colons(&self, a: usize, b: usize) -> Vec<TokRange> {
        let mut out = Vec::new();
        let mut depth = 0usize;
        let mut pending_questions = 0usize;
        let mut piece = a;
        for i in a..b {
            let kind = &self.tokens[i].kind;
            if kind.is_open() {
                depth += 1;
            } else if kind.is_close() {
                depth = depth.saturating_sub(1);
            } else if depth == 0 && *kind == TokenKind::Question {
                pending_questions += 1;
            } else if depth == 0 && *kind == TokenKind::Colon {
                if pending_questions > 0 {
                    pending_questions -= 1;
                } else {
                    out.push((piece, i));
                    piece = i + 1;
                }
            }
        }
        out.push((piece, b));
        out
    }

    /// True when the identifier at `at` is the declarator of a C declaration:
    /// `double v[n]`, `int *w[2]`, or `int n, v[n]`.
    fn is_declarator(&self, at: usize) -> bool {
        let tokens = self.tokens;
        let mut i = at;
        let mut stars = 0usize;
        while i > 0 && tokens[i - 1].kind == TokenKind::Star {
            i -= 1;
            stars += 1;
        }
        if i == 0 {
            return false;
        }
        match &tokens[i - 1].kind {
            // Two adjacent words only occur in a declaration; `a * b[i]` is
            // a product unless `a` is a type.
            TokenKind::Ident(word) if stars == 0 => !is_expression_keyword(word),
            TokenKind::Ident(word) => is_type_word(word),
            TokenKind::Comma => self.in_declaration_list(i - 1),
            _ => false,
        }
    }

    /// Whether the top-level comma at `comma` separates the declarators of a
    /// declaration statement rather than the operands of a comma expression.
    fn in_declaration_list(&self, comma: usize) -> bool {
        let tokens = self.tokens;
        let mut depth = 0usize;
        let mut i = comma;
        let start = loop {
            if i == 0 {
                break 0;
            }
            i -= 1;
            let kind = &tokens[i].kind;
            if depth == 0 {
                match kind {
                    TokenKind::Semi | TokenKind::LBrace | TokenKind::Directive => break i + 1,
                    // An initializer such as `= {1, 2}` belongs to the statement.
                    TokenKind::RBrace => match self.matching_open(i) {
                        Some(open) if open > 0 && is_assign(&tokens[open - 1].kind) => {
                            i = open;
                            continue;
                        }
                        _ => break i + 1,
                    },
                    // Parameters and call arguments are not statements.
                    k if k.is_open() => return false,
                    _ => {}
                }
            }
            if kind.is_close() {
                depth += 1;
            } else if kind.is_open() {
                depth = depth.saturating_sub(1);
            }
        };
        match (tokens.get(start).map(|t| &t.kind), tokens.get(start + 1).map(|t| &t.kind)) {
            (Some(TokenKind::Ident(first)), Some(TokenKind::Ident(_))) => !is_expression_keyword(first),
            (Some(TokenKind::Ident(first)), Some(TokenKind::Star)) => is_type_word(first),
            _ => false,
        }
    }

    /// The opening delimiter matched by the closing one at `close`, searching
    /// backwards.
    fn matching_open(&self, close: usize) -> Option<usize> {
        let mut depth = 0usize;
        for i in (0..=close).rev() {
            let kind = &self.tokens[i].kind;
            if kind.is_close() {
                depth += 1;
            } else if kind.is_open() {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
        }
        None
    }

    fn after_member_access(&self) -> bool {
        self.idx > 0
            && matches!(
                self.tokens[self.idx - 1].kind,
                TokenKind::Dot | TokenKind::Arrow
            )
    }

    /// Zero-width span just after the token preceding `idx`, for empty pieces.
    fn gap_span(&self, open_idx: usize, idx: usize) -> Span {
        let prev = if idx > open_idx { idx - 1 } else { open_idx };
        let at = span_end(self.tokens[prev].span);
        span_between(at, at)
    }

    fn expect_ident(&mut self) -> Result<Ident, ParseError> {
        let tok = self.expect_any()?;
        match tok.kind {
            TokenKind::Ident(name) => Ok(Ident::new(tok.span, name)),
            _ => Err(ParseError {
                message: "expected identifier".to_string(),
                span: tok.span,
            }),
        }
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token, ParseError> {
        let tok = self.expect_any()?;
        if std::mem::discriminant(&tok.kind) == std::mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError {
                message: format!("expected {expected:?}"),
                span: tok.span,
            })
        }
    }

    fn expect_any(&mut self) -> Result<Token, ParseError> {
        let tok = self.tokens.get(self.idx).cloned().ok_or_else(|| ParseError {
            message: "unexpected end of input".to_string(),
            span: span_between(self.src.len(), self.src.len()),
        })?;
        if tok.kind == TokenKind::Eof {
            return Err(ParseError {
                message: "unexpected end of input".to_string(),
                span: tok.span,
            });
        }
        self.idx += 1;
        Ok(tok)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.idx).map(|t| &t.kind)
    }

    fn peek_kind_n(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.idx + n).map(|t| &t.kind)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.idx)
            .map(|t| t.span)
            .unwrap_or_else(|| span_between(self.src.len(), self.src.len()))
    }
}

/// Names introduced by any `dimension` statement in the unit. Only these can be
/// subscripted with parentheses; everything else of the form `f(...)` is a call.
fn collect_dimensioned_names(tokens: &[Token]) -> HashSet<String> {
    let mut out = HashSet::new();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].kind == TokenKind::KwDimension {
            let mut j = i + 1;
            if matches!(tokens.get(j).map(|t| &t.kind), Some(TokenKind::String(_))) {
                j += 1;
            }
            if let Some(TokenKind::Ident(name)) = tokens.get(j).map(|t| &t.kind) {
                out.insert(name.clone());
            }
        }
        i += 1;
    }
    out
}

/// Words after which an identifier starts an expression, not a declarator.
fn is_expression_keyword(word: &str) -> bool {
    matches!(
        word,
        "return" | "case" | "sizeof" | "else" | "do" | "goto" | "_Alignof" | "alignof" | "typeof"
            | "__typeof__"
    )
}

/// Type specifiers and qualifiers that can precede `*` in a declaration.
fn is_type_word(word: &str) -> bool {
    matches!(
        word,
        "void"
            | "char"
            | "short"
            | "int"
            | "long"
            | "float"
            | "double"
            | "signed"
            | "unsigned"
            | "_Bool"
            | "bool"
            | "complex"
            | "_Complex"
            | "const"
            | "volatile"
            | "restrict"
    ) || word.ends_with("_t")
}

fn is_assign(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Op(op) if op == "=")
}

fn closes(open: &TokenKind, close: &TokenKind) -> bool {
    matches!(
        (open, close),
        (TokenKind::LParen, TokenKind::RParen)
            | (TokenKind::LBracket, TokenKind::RBracket)
            | (TokenKind::LBrace, TokenKind::RBrace)
    )
}

fn unquote(text: &str) -> String {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
        .to_string()
}
