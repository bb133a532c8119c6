#![forbid(unsafe_code)]

mod config;
mod emit;
mod error;
mod helpers;
mod offset;
mod registry;
mod shape;

use cnd_lex::Lexer;
use cnd_parse::Scanner;
use tracing::debug;

pub use cnd_ast::line_col;
pub use config::{ShadowPolicy, SingleBound, TranslateConfig};
pub use emit::{AxisRecord, Emitter, ShapeRecord};
pub use error::{IndexOutOfRange, ModelError, ShapeError, TranslateError};
pub use helpers::{expand_helper, HelperArg, HelperContext, ALLOC_FAILURE_FN};
pub use offset::{compile_offset, CheckSite, CHECK_INDEX_FN};
pub use registry::ShapeRegistry;
pub use shape::{AxisPart, AxisSpec, ConcreteAxis, ConcreteShape, ShapeDescriptor, StorageOrder};

/// Result of translating one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Translation {
    pub output: String,
    /// Declarations in source order.
    pub shapes: Vec<ShapeRecord>,
}

/// Translate the C source `src` of the unit `name` (used in `#line`
/// directives and runtime diagnostics).
pub fn translate(name: &str, src: &str, config: &TranslateConfig) -> Result<String, TranslateError> {
    translate_unit(name, src, config).map(|t| t.output)
}

/// Like [`translate`], also returning the declarations it registered.
pub fn translate_unit(
    name: &str,
    src: &str,
    config: &TranslateConfig,
) -> Result<Translation, TranslateError> {
    let tokens = Lexer::new(src).lex()?;
    let unit = Scanner::new(src, &tokens).scan()?;
    debug!(unit = name, fragments = unit.fragments.len(), "scanned unit");

    let mut emitter = Emitter::new(name, src, config);
    let output = emitter.emit(&unit)?;
    Ok(Translation {
        output,
        shapes: emitter.into_records(),
    })
}
