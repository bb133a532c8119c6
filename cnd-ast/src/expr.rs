#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

/// Integer-valued C expression as seen by the offset arithmetic.
///
/// Only the operators the translator itself synthesizes are modelled; any other
/// host expression is carried verbatim as [`Expr::Opaque`] and treated as a
/// value with unknown side effects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Int(i64),
    Var(String),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Opaque(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("variable '{0}' has no value")]
    Unbound(String),
    #[error("cannot evaluate host expression '{0}'")]
    Opaque(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
}

/// Variable bindings used to evaluate bound expressions.
pub trait Env {
    fn get(&self, name: &str) -> Option<i64>;
}

impl Env for HashMap<String, i64> {
    fn get(&self, name: &str) -> Option<i64> {
        HashMap::get(self, name).copied()
    }
}

impl Env for BTreeMap<String, i64> {
    fn get(&self, name: &str) -> Option<i64> {
        BTreeMap::get(self, name).copied()
    }
}

impl Env for [(&str, i64)] {
    fn get(&self, name: &str) -> Option<i64> {
        self.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
    }
}

impl<const N: usize> Env for [(&str, i64); N] {
    fn get(&self, name: &str) -> Option<i64> {
        Env::get(self.as_slice(), name)
    }
}

/// Host text as a single line: comments dropped, whitespace runs collapsed.
pub fn one_line(text: &str) -> String {
    strip_comments(text).split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace every C comment outside string and character literals with a
/// single space. An unterminated block comment swallows the rest.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                out.push(' ');
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            ('"' | '\'', _) => {
                quote = Some(c);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

// The constructors below fold as they build: literal arithmetic is computed,
// identities are dropped and constants migrate to the right of sums. Folding
// never discards a subexpression that is not pure.
impl Expr {
    pub fn int(n: i64) -> Self {
        Expr::Int(n)
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    /// Host text that the arithmetic parser does not model. Comments are
    /// dropped, and line breaks and runs of whitespace collapse to single
    /// spaces so the text can be repeated inside a one-line rewrite.
    pub fn opaque(text: impl AsRef<str>) -> Self {
        Expr::Opaque(one_line(text.as_ref()))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// True when evaluating the expression has no side effects the translator
    /// could drop.
    pub fn is_pure(&self) -> bool {
        match self {
            Expr::Int(_) | Expr::Var(_) => true,
            Expr::Neg(e) => e.is_pure(),
            Expr::Binary { left, right, .. } => left.is_pure() && right.is_pure(),
            Expr::Opaque(_) => false,
        }
    }

    pub fn neg(e: Expr) -> Expr {
        match e {
            Expr::Int(n) => match n.checked_neg() {
                Some(v) => Expr::Int(v),
                None => Expr::Neg(Box::new(Expr::Int(n))),
            },
            Expr::Neg(inner) => *inner,
            other => Expr::Neg(Box::new(other)),
        }
    }

    pub fn add(left: Expr, right: Expr) -> Expr {
        match (left, right) {
            (Expr::Int(a), Expr::Int(b)) => match a.checked_add(b) {
                Some(v) => Expr::Int(v),
                None => Expr::raw(BinOp::Add, Expr::Int(a), Expr::Int(b)),
            },
            (Expr::Int(a), r) => Expr::add(r, Expr::Int(a)),
            (l, Expr::Int(b)) => Expr::offset_by(l, b),
            (l, Expr::Neg(r)) => Expr::sub(l, *r),
            (Expr::Neg(l), r) => Expr::sub(r, *l),
            (l, r) => Expr::raw(BinOp::Add, l, r),
        }
    }

    pub fn sub(left: Expr, right: Expr) -> Expr {
        match (left, right) {
            (Expr::Int(a), Expr::Int(b)) => match a.checked_sub(b) {
                Some(v) => Expr::Int(v),
                None => Expr::raw(BinOp::Sub, Expr::Int(a), Expr::Int(b)),
            },
            (l, Expr::Int(b)) => match b.checked_neg() {
                Some(nb) => Expr::offset_by(l, nb),
                None => Expr::raw(BinOp::Sub, l, Expr::Int(b)),
            },
            (Expr::Int(0), r) => Expr::neg(r),
            (l, Expr::Neg(r)) => Expr::add(l, *r),
            (l, r) if l == r && l.is_pure() => Expr::Int(0),
            (l, r) => Expr::raw(BinOp::Sub, l, r),
        }
    }

    pub fn mul(left: Expr, right: Expr) -> Expr {
        match (left, right) {
            (Expr::Int(a), Expr::Int(b)) => match a.checked_mul(b) {
                Some(v) => Expr::Int(v),
                None => Expr::raw(BinOp::Mul, Expr::Int(a), Expr::Int(b)),
            },
            (Expr::Int(1), r) => r,
            (l, Expr::Int(1)) => l,
            (Expr::Int(0), r) if r.is_pure() => Expr::Int(0),
            (l, Expr::Int(0)) if l.is_pure() => Expr::Int(0),
            (l, r) => Expr::raw(BinOp::Mul, l, r),
        }
    }

    pub fn div(left: Expr, right: Expr) -> Expr {
        match (left, right) {
            (Expr::Int(a), Expr::Int(b)) if b != 0 => match a.checked_div(b) {
                Some(v) => Expr::Int(v),
                None => Expr::raw(BinOp::Div, Expr::Int(a), Expr::Int(b)),
            },
            (l, Expr::Int(1)) => l,
            (l, r) => Expr::raw(BinOp::Div, l, r),
        }
    }

    pub fn rem(left: Expr, right: Expr) -> Expr {
        match (left, right) {
            (Expr::Int(a), Expr::Int(b)) if b != 0 => match a.checked_rem(b) {
                Some(v) => Expr::Int(v),
                None => Expr::raw(BinOp::Rem, Expr::Int(a), Expr::Int(b)),
            },
            (l, Expr::Int(1)) if l.is_pure() => Expr::Int(0),
            (l, r) => Expr::raw(BinOp::Rem, l, r),
        }
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        match op {
            BinOp::Add => Expr::add(left, right),
            BinOp::Sub => Expr::sub(left, right),
            BinOp::Mul => Expr::mul(left, right),
            BinOp::Div => Expr::div(left, right),
            BinOp::Rem => Expr::rem(left, right),
        }
    }

    fn raw(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `e + c`, merging `c` into a constant term already trailing `e`.
    fn offset_by(e: Expr, c: i64) -> Expr {
        let (base, k) = match e {
            Expr::Binary {
                op: BinOp::Add,
                left,
                right,
            } if matches!(*right, Expr::Int(_)) => {
                let k = right.as_int().unwrap_or(0);
                (*left, k)
            }
            Expr::Binary {
                op: BinOp::Sub,
                left,
                right,
            } if right.as_int().is_some_and(|k| k != i64::MIN) => {
                let k = -right.as_int().unwrap_or(0);
                (*left, k)
            }
            other => (other, 0),
        };

        let Some(total) = k.checked_add(c) else {
            return Expr::raw(BinOp::Add, Expr::offset_by(base, k), Expr::Int(c));
        };

        match total {
            0 => base,
            t if t > 0 => Expr::raw(BinOp::Add, base, Expr::Int(t)),
            t => match t.checked_neg() {
                Some(p) => Expr::raw(BinOp::Sub, base, Expr::Int(p)),
                None => Expr::raw(BinOp::Add, base, Expr::Int(t)),
            },
        }
    }

    /// Evaluate with C semantics for signed integers (truncating division,
    /// remainder takes the sign of the dividend).
    pub fn eval(&self, env: &(impl Env + ?Sized)) -> Result<i64, EvalError> {
        match self {
            Expr::Int(n) => Ok(*n),
            Expr::Var(name) => env.get(name).ok_or_else(|| EvalError::Unbound(name.clone())),
            Expr::Neg(e) => e.eval(env)?.checked_neg().ok_or(EvalError::Overflow),
            Expr::Binary { op, left, right } => {
                let l = left.eval(env)?;
                let r = right.eval(env)?;
                let v = match op {
                    BinOp::Add => l.checked_add(r),
                    BinOp::Sub => l.checked_sub(r),
                    BinOp::Mul => l.checked_mul(r),
                    BinOp::Div => {
                        if r == 0 {
                            return Err(EvalError::DivisionByZero);
                        }
                        l.checked_div(r)
                    }
                    BinOp::Rem => {
                        if r == 0 {
                            return Err(EvalError::DivisionByZero);
                        }
                        l.checked_rem(r)
                    }
                };
                v.ok_or(EvalError::Overflow)
            }
            Expr::Opaque(text) => Err(EvalError::Opaque(text.clone())),
        }
    }

    /// Names of the variables the expression reads, in first-use order.
    pub fn vars(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Var(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Neg(e) => e.collect_vars(out),
            Expr::Binary { left, right, .. } => {
                left.collect_vars(out);
                right.collect_vars(out);
            }
            Expr::Int(_) | Expr::Opaque(_) => {}
        }
    }
}
