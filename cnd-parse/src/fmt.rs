#![forbid(unsafe_code)]

use cnd_ast::{
    format_expr, line_col, span_end, span_start, Arg, AxisBounds, Delim, Fragment, Span, Unit,
};

const INDENT: &str = "  ";

/// Human-readable listing of a scanned unit, one site per line. Text runs are
/// summarized by their line range.
pub fn format_fragments(unit: &Unit, src: &str) -> String {
    let mut out = String::new();
    fmt_fragments(&mut out, 0, &unit.fragments, src);
    out
}

fn fmt_fragments(out: &mut String, indent: usize, fragments: &[Fragment], src: &str) {
    for f in fragments {
        indent_line(out, indent);
        out.push_str(&location(src, f.span()));
        out.push(' ');
        match f {
            Fragment::Text(span) => {
                let (l0, _) = line_col(src, span_start(*span));
                let (l1, _) = line_col(src, span_end(*span));
                out.push_str(&format!("text ({} bytes, lines {l0}-{l1})\n", span.len()));
            }
            Fragment::ScopeOpen(_) => out.push_str("scope-open\n"),
            Fragment::ScopeClose(_) => out.push_str("scope-close\n"),
            Fragment::Declaration(d) => {
                out.push_str("dimension ");
                if let Some(layout) = &d.layout {
                    out.push_str(&format!("\"{}\" ", layout.node));
                }
                out.push_str(&d.name.node);
                out.push('[');
                for (i, axis) in d.axes.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    match &axis.bounds {
                        AxisBounds::Upper(hi) => out.push_str(&arg_text(hi, src)),
                        AxisBounds::Range {
                            lower,
                            upper,
                            step,
                            leading,
                        } => {
                            if let Some(lo) = lower {
                                out.push_str(&arg_text(lo, src));
                            }
                            out.push(':');
                            if let Some(hi) = upper {
                                out.push_str(&arg_text(hi, src));
                            }
                            if step.is_some() || leading.is_some() {
                                out.push(':');
                                if let Some(step) = step {
                                    out.push_str(&arg_text(step, src));
                                }
                            }
                            if let Some(ld) = leading {
                                out.push(':');
                                out.push_str(&arg_text(ld, src));
                            }
                        }
                    }
                }
                out.push_str("]\n");
            }
            Fragment::Subscript(s) => {
                let (open, close) = match s.delim {
                    Delim::Bracket => ('[', ']'),
                    Delim::Paren => ('(', ')'),
                };
                out.push_str(&format!("subscript {}{open}", s.name.node));
                let args: Vec<String> = s.args.iter().map(|a| arg_text(a, src)).collect();
                out.push_str(&args.join(", "));
                out.push(close);
                out.push('\n');
                fmt_nested(out, indent, &s.args, src);
            }
            Fragment::Helper(h) => {
                out.push_str(&format!("helper {}(", h.name.node));
                let args: Vec<String> = h.args.iter().map(|a| arg_text(a, src)).collect();
                out.push_str(&args.join(", "));
                out.push_str(")\n");
                fmt_nested(out, indent, &h.args, src);
            }
        }
    }
}

fn fmt_nested(out: &mut String, indent: usize, args: &[Arg], src: &str) {
    for a in args {
        if a.fragments.iter().any(|f| !matches!(f, Fragment::Text(_))) {
            fmt_fragments(out, indent + 1, &a.fragments, src);
        }
    }
}

fn arg_text(arg: &Arg, src: &str) -> String {
    match &arg.expr {
        Some(e) => format_expr(e),
        None => src[span_start(arg.span)..span_end(arg.span)].to_string(),
    }
}

fn location(src: &str, span: Span) -> String {
    let (line, col) = line_col(src, span_start(span));
    format!("{line}:{col}")
}

fn indent_line(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str(INDENT);
    }
}
