#![forbid(unsafe_code)]

use std::collections::HashMap;

use cnd_ast::{
    format_expr, line_col, span_end, span_start, Arg, AxisBounds, Delim, DimensionDecl, Expr, Fragment,
    HelperCall, Span, Subscript, Unit,
};
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::TranslateConfig;
use crate::error::ShapeError;
use crate::helpers::{expand_helper, HelperArg, HelperContext, ALLOC_FAILURE_FN};
use crate::offset::{compile_offset, escape_c_string, CheckSite, CHECK_INDEX_FN};
use crate::registry::ShapeRegistry;
use crate::shape::{AxisSpec, ShapeDescriptor, StorageOrder};

/// A declaration as it was registered, for listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ShapeRecord {
    pub name: String,
    pub line: usize,
    pub column: usize,
    /// Block nesting at the declaration; 0 is file scope.
    pub depth: usize,
    pub order: &'static str,
    pub axes: Vec<AxisRecord>,
    /// `None` while an axis is open.
    pub element_count: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AxisRecord {
    pub lower: String,
    pub upper: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leading: Option<String>,
}

impl ShapeRecord {
    fn new(src: &str, depth: usize, desc: &ShapeDescriptor) -> Self {
        let (line, column) = line_col(src, span_start(desc.span()));
        Self {
            name: desc.name().to_string(),
            line,
            column,
            depth,
            order: desc.order().as_str(),
            axes: desc
                .axes()
                .iter()
                .map(|a| AxisRecord {
                    lower: format_expr(&a.lower),
                    upper: a.upper.as_ref().map(format_expr),
                    step: a.step.as_ref().map(format_expr),
                    leading: a.leading.as_ref().map(format_expr),
                })
                .collect(),
            element_count: desc.element_count().map(|e| format_expr(&e)),
        }
    }
}

/// Walks a scanned unit, keeps the shape registry in step with the braces
/// it passes, and writes the translated text.
pub struct Emitter<'a> {
    file: &'a str,
    src: &'a str,
    config: &'a TranslateConfig,
    registry: ShapeRegistry,
    /// Byte offsets of every declaration in the unit, by name.
    declared_at: HashMap<String, Vec<usize>>,
    materialized: usize,
    records: Vec<ShapeRecord>,
}

impl<'a> Emitter<'a> {
    pub fn new(file: &'a str, src: &'a str, config: &'a TranslateConfig) -> Self {
        Self {
            file,
            src,
            config,
            registry: ShapeRegistry::new(config.shadowing),
            declared_at: HashMap::new(),
            materialized: 0,
            records: Vec::new(),
        }
    }

    /// Translate `unit`, preamble included when configured.
    pub fn emit(&mut self, unit: &Unit) -> Result<String, ShapeError> {
        for decl in unit.declarations() {
            self.declared_at
                .entry(decl.name.node.clone())
                .or_default()
                .push(span_start(decl.span));
        }

        let mut body = String::with_capacity(self.src.len());
        self.emit_fragments(&unit.fragments, &mut body)?;

        if !self.config.preamble {
            return Ok(body);
        }
        let mut out = preamble(self.config);
        if self.config.line_directives {
            out.push_str(&format!("#line 1 \"{}\"\n", escape_c_string(self.file)));
        }
        out.push_str(&body);
        Ok(out)
    }

    /// Every declaration registered so far, in source order.
    pub fn records(&self) -> &[ShapeRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ShapeRecord> {
        self.records
    }

    fn emit_fragments(&mut self, fragments: &[Fragment], out: &mut String) -> Result<(), ShapeError> {
        for fragment in fragments {
            match fragment {
                Fragment::Text(span) => out.push_str(self.text(*span)),
                Fragment::ScopeOpen(span) => {
                    self.registry.enter_scope();
                    out.push_str(self.text(*span));
                }
                Fragment::ScopeClose(span) => {
                    self.registry.exit_scope(*span)?;
                    out.push_str(self.text(*span));
                }
                Fragment::Declaration(decl) => {
                    let text = self.declare(decl)?;
                    self.push_padded(out, decl.span, &text);
                }
                Fragment::Subscript(sub) => self.emit_subscript(sub, out)?,
                Fragment::Helper(call) => {
                    let text = self.expand(call)?;
                    self.push_padded(out, call.span, &text);
                }
            }
        }
        Ok(())
    }

    /// Register a declaration. Returns the text that replaces it, which is
    /// empty unless its bounds are materialized.
    fn declare(&mut self, decl: &DimensionDecl) -> Result<String, ShapeError> {
        let order = match &decl.layout {
            None => StorageOrder::RowMajor,
            Some(layout) => {
                StorageOrder::from_layout(&layout.node).ok_or_else(|| ShapeError::InvalidLayout {
                    layout: layout.node.clone(),
                    span: layout.span,
                })?
            }
        };

        let mut axes = Vec::with_capacity(decl.axes.len());
        for axis in &decl.axes {
            let spec = match &axis.bounds {
                AxisBounds::Upper(hi) => AxisSpec::single(self.arg_value(hi)?, self.config.single_bound),
                AxisBounds::Range {
                    lower,
                    upper,
                    step,
                    leading,
                } => {
                    let lo = match lower {
                        Some(lo) => self.arg_value(lo)?,
                        None => Expr::int(0),
                    };
                    let spec = match upper {
                        Some(hi) => AxisSpec::new(lo, self.arg_value(hi)?),
                        None => AxisSpec::open(lo),
                    };
                    let step = step.as_ref().map(|s| self.arg_value(s)).transpose()?;
                    let leading = leading.as_ref().map(|l| self.arg_value(l)).transpose()?;
                    spec.with_step(step).with_leading(leading)
                }
            };
            axes.push(spec);
        }

        let mut desc = ShapeDescriptor::new(decl.name.node.clone(), order, axes, decl.span);
        let mut text = String::new();
        if self.config.materialize_bounds && self.registry.depth() > 0 {
            (desc, text) = self.materialize(desc);
        }

        self.registry.declare(desc.clone())?;
        self.records
            .push(ShapeRecord::new(self.src, self.registry.depth(), &desc));
        Ok(text)
    }

    /// Bind every non-literal bound to a `const` local so it is evaluated once
    /// per entry into the scope.
    fn materialize(&mut self, desc: ShapeDescriptor) -> (ShapeDescriptor, String) {
        self.materialized += 1;
        let seq = self.materialized;
        let name = desc.name().to_string();
        let mut inits = Vec::new();
        let desc = desc.map_bounds(|k, part, bound| {
            if matches!(bound, Expr::Int(_)) {
                return bound.clone();
            }
            let local = format!("__cnd_{name}_{}{k}_{seq}", part.as_str());
            inits.push(format!("{local} = ({})", format_expr(bound)));
            Expr::var(local)
        });
        if inits.is_empty() {
            return (desc, String::new());
        }
        let text = format!("{} const {};", self.config.index_type, inits.join(", "));
        (desc, text)
    }

    fn emit_subscript(&mut self, sub: &Subscript, out: &mut String) -> Result<(), ShapeError> {
        let name = sub.name.node.as_str();
        if self.registry.get(name).is_none() {
            if sub.delim == Delim::Bracket && sub.args.len() > 1 {
                return Err(self.unknown_shape(name, sub.span));
            }
            // Ordinary C indexing or a call.
            return self.emit_passthrough(sub.span, &sub.args, out);
        }

        let mut indices = Vec::with_capacity(sub.args.len());
        for arg in &sub.args {
            indices.push(self.arg_value(arg)?);
        }
        let line = self.line_of(sub.span);
        let check = self.config.bounds_check.then_some(CheckSite {
            file: self.file,
            line,
        });
        let desc = self.registry.lookup(name, sub.name.span)?;
        let offset = compile_offset(desc, &indices, sub.span, check)?;

        let text = format!("{name}[{}]", format_expr(&offset));
        debug!(symbol = name, line, rewrite = text.as_str(), "rewrite subscript");
        self.push_padded(out, sub.span, &text);
        Ok(())
    }

    fn expand(&mut self, call: &HelperCall) -> Result<String, ShapeError> {
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(HelperArg {
                span: arg.span,
                text: self.render_arg(arg)?,
                expr: arg.expr.clone(),
                ident: arg.ident.as_ref(),
            });
        }
        let ctx = HelperContext {
            config: self.config,
            file: self.file,
            line: self.line_of(call.span),
        };
        expand_helper(call, &args, &mut self.registry, ctx).map_err(|e| self.annotate(e))
    }

    /// Copy a site unchanged apart from the sites nested in its arguments.
    fn emit_passthrough(&mut self, span: Span, args: &[Arg], out: &mut String) -> Result<(), ShapeError> {
        let mut pos = span_start(span);
        for arg in args {
            out.push_str(&self.src[pos..span_start(arg.span)]);
            let rendered = self.render_arg(arg)?;
            out.push_str(&rendered);
            pos = span_end(arg.span);
        }
        out.push_str(&self.src[pos..span_end(span)]);
        trace!(site = ?span, "pass through");
        Ok(())
    }

    fn render_arg(&mut self, arg: &Arg) -> Result<String, ShapeError> {
        let mut out = String::new();
        self.emit_fragments(&arg.fragments, &mut out)?;
        Ok(out)
    }

    fn arg_value(&mut self, arg: &Arg) -> Result<Expr, ShapeError> {
        match &arg.expr {
            Some(e) => Ok(e.clone()),
            None => Ok(Expr::opaque(self.render_arg(arg)?)),
        }
    }

    fn unknown_shape(&self, name: &str, span: Span) -> ShapeError {
        self.annotate(ShapeError::UnknownShape {
            name: name.to_string(),
            span,
            help: None,
        })
    }

    /// Explain an unknown shape whose name is declared somewhere else in the
    /// unit.
    fn annotate(&self, err: ShapeError) -> ShapeError {
        let ShapeError::UnknownShape {
            name,
            span,
            help: None,
        } = err
        else {
            return err;
        };
        let at = span_start(span);
        let offsets = self.declared_at.get(&name).map(Vec::as_slice).unwrap_or(&[]);
        let help = if let Some(&later) = offsets.iter().find(|&&o| o > at) {
            let (line, _) = line_col(self.src, later);
            Some(format!(
                "'{name}' is declared on line {line}, after this use; declare it before the first use"
            ))
        } else {
            offsets.last().map(|&earlier| {
                let (line, _) = line_col(self.src, earlier);
                format!("the declaration of '{name}' on line {line} is not in scope here")
            })
        };
        ShapeError::UnknownShape { name, span, help }
    }

    /// Write `text` in place of `span`, followed by the newlines `span`
    /// covered so later lines keep their numbers.
    fn push_padded(&self, out: &mut String, span: Span, text: &str) {
        out.push_str(text);
        let covered = self.text(span).matches('\n').count();
        let written = text.matches('\n').count();
        for _ in written..covered {
            out.push('\n');
        }
    }

    fn text(&self, span: Span) -> &'a str {
        &self.src[span_start(span)..span_end(span)]
    }

    fn line_of(&self, span: Span) -> usize {
        line_col(self.src, span_start(span)).0
    }
}

fn preamble(config: &TranslateConfig) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "#define CND_VERSION_MAJOR {}\n",
        env!("CARGO_PKG_VERSION_MAJOR")
    ));
    out.push_str(&format!(
        "#define CND_VERSION_MINOR {}\n",
        env!("CARGO_PKG_VERSION_MINOR")
    ));
    out.push_str(&format!(
        "#define CND_VERSION_TEXT \"{}\"\n",
        env!("CARGO_PKG_VERSION")
    ));
    out.push_str("#include <stdlib.h>\n");

    if config.bounds_check || config.check_allocations {
        out.push_str("#include <stdio.h>\n");
    }
    if config.bounds_check {
        let ty = &config.index_type;
        out.push_str(&format!(
            "static inline {ty} {CHECK_INDEX_FN}({ty} idx, {ty} lo, {ty} hi, int axis, const char *name, const char *file, int line) {{\n"
        ));
        out.push_str("  if (idx < lo || idx > hi) {\n");
        out.push_str("    fprintf(stderr, \"%s:%d: index %lld out of range %lld..%lld on axis %d of '%s'\\n\",\n");
        out.push_str("            file, line, (long long)idx, (long long)lo, (long long)hi, axis, name);\n");
        out.push_str("    fflush(stderr);\n");
        out.push_str("    abort();\n");
        out.push_str("  }\n");
        out.push_str("  return idx;\n");
        out.push_str("}\n");
    }
    if config.check_allocations {
        out.push_str(&format!(
            "static inline void {ALLOC_FAILURE_FN}(const char *name, const char *file, int line) {{\n"
        ));
        out.push_str("  fprintf(stderr, \"%s:%d: allocation of '%s' failed\\n\", file, line, name);\n");
        out.push_str("  fflush(stderr);\n");
        out.push_str("  abort();\n");
        out.push_str("}\n");
    }
    out
}
