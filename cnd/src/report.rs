#![forbid(unsafe_code)]

use std::fmt::Write as _;

use cnd_core::{AxisRecord, ShapeRecord};
use miette::IntoDiagnostic;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ShapesReport {
    pub schema: &'static str,
    pub input: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub shapes: Vec<ShapeRecord>,
}

impl ShapesReport {
    pub fn new(input: String, result: Result<Vec<ShapeRecord>, String>) -> Self {
        let (ok, error, shapes) = match result {
            Ok(shapes) => (true, None, shapes),
            Err(e) => (false, Some(e), Vec::new()),
        };
        Self {
            schema: "cnd.shapes.v1",
            input,
            ok,
            error,
            shapes,
        }
    }

    pub fn to_json(&self) -> miette::Result<String> {
        serde_json::to_string_pretty(self).into_diagnostic()
    }

    /// One line per declaration:
    /// `file:line:col  name[lo:hi, ...]  order  depth N  count EXPR`.
    /// Axes with a step or leading dimension print them as written.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for s in &self.shapes {
            let axes: Vec<String> = s.axes.iter().map(axis_text).collect();
            let count = s.element_count.as_deref().unwrap_or("open");
            let _ = writeln!(
                out,
                "{}:{}:{}  {}[{}]  {}  depth {}  count {count}",
                self.input,
                s.line,
                s.column,
                s.name,
                axes.join(", "),
                s.order,
                s.depth,
            );
        }
        out
    }
}

fn axis_text(a: &AxisRecord) -> String {
    let mut text = format!("{}:{}", a.lower, a.upper.as_deref().unwrap_or(""));
    if a.step.is_some() || a.leading.is_some() {
        text.push(':');
        text.push_str(a.step.as_deref().unwrap_or(""));
    }
    if let Some(ld) = &a.leading {
        text.push(':');
        text.push_str(ld);
    }
    text
}
