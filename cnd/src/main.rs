#![forbid(unsafe_code)]

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use clap::{Parser, Subcommand};
use cnd_core::{ShadowPolicy, SingleBound, TranslateConfig, TranslateError};
use miette::{Diagnostic, IntoDiagnostic, NamedSource};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod frontend;
mod manifest;
mod preprocess;
mod report;

#[derive(Parser, Debug)]
#[command(name = "cnd", version, about = "Translate C with `dimension` declarations into plain C")]
struct Cli {
    /// More log output on stderr (repeatable). `CND_LOG` overrides this.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Cmd,
}

/// Command-line overrides for the `[translate]` table of `cnd.toml`.
#[derive(clap::Args, Debug, Clone, Default)]
struct TranslateFlags {
    /// Check every index against its axis range at run time
    #[arg(long)]
    bounds_check: bool,

    /// Abort when a heap allocation helper gets NULL
    #[arg(long)]
    check_allocations: bool,

    /// Omit the version macros and runtime support functions
    #[arg(long)]
    no_preamble: bool,

    /// Omit the `#line` directive after the preamble
    #[arg(long)]
    no_line_directives: bool,

    /// Redeclaration policy: `allow`, `forbid-same-scope`, or `forbid`
    #[arg(long)]
    shadowing: Option<ShadowPolicy>,

    /// Reading of a single bound `b`: `inclusive` (0..=b) or `extent` (0..b)
    #[arg(long)]
    single_bound: Option<SingleBound>,

    /// Bind non-literal block-scope bounds to `const` locals
    #[arg(long)]
    materialize_bounds: bool,

    /// C type for loop variables and checked indices
    #[arg(long)]
    index_type: Option<String>,
}

impl TranslateFlags {
    fn apply(&self, config: &mut TranslateConfig) {
        config.bounds_check |= self.bounds_check;
        config.check_allocations |= self.check_allocations;
        config.materialize_bounds |= self.materialize_bounds;
        if self.no_preamble {
            config.preamble = false;
        }
        if self.no_line_directives {
            config.line_directives = false;
        }
        if let Some(p) = self.shadowing {
            config.shadowing = p;
        }
        if let Some(b) = self.single_bound {
            config.single_bound = b;
        }
        if let Some(t) = &self.index_type {
            config.index_type = t.clone();
        }
    }
}

/// Running the C preprocessor ahead of translation.
#[derive(clap::Args, Debug, Clone, Default)]
struct CppFlags {
    /// Run the C preprocessor over each unit before translating it
    #[arg(short = 'E', long)]
    preprocess: bool,

    /// Include directory for the preprocessor (repeatable)
    #[arg(short = 'I', long = "include", value_name = "DIR", requires = "preprocess")]
    includes: Vec<PathBuf>,

    /// Macro definition for the preprocessor (repeatable)
    #[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]", requires = "preprocess")]
    defines: Vec<String>,

    /// Preprocessor command (default: `$CND_CPP`, `$CPP`, then `cpp`)
    #[arg(long, value_name = "COMMAND", requires = "preprocess")]
    cpp: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Translate units to plain C
    Translate {
        /// Input .c files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output file (single input only; default: stdout)
        #[arg(short, long, conflicts_with = "out_dir")]
        output: Option<PathBuf>,

        /// Write each translated unit under this directory, keeping its file name
        #[arg(long)]
        out_dir: Option<PathBuf>,

        #[command(flatten)]
        flags: TranslateFlags,

        #[command(flatten)]
        cpp: CppFlags,
    },

    /// List the declarations of a unit
    Shapes {
        /// Input .c file
        path: PathBuf,

        /// Print a JSON report instead of text
        #[arg(long, default_value_t = false)]
        json: bool,

        #[command(flatten)]
        flags: TranslateFlags,

        #[command(flatten)]
        cpp: CppFlags,
    },

    /// Dump the classified fragment stream of a unit
    Scan {
        /// Input .c file
        path: PathBuf,
    },

    /// Run a C compiler on translated copies of the C sources among its arguments
    Cc {
        #[command(flatten)]
        flags: TranslateFlags,

        /// Compiler command, e.g. `gcc`
        compiler: String,

        /// Compiler arguments; `*.c` entries are translated first
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Debug, Error, Diagnostic)]
#[error("cannot {action} {path}")]
#[diagnostic(code(cnd::io))]
struct IoError {
    action: &'static str,
    path: String,
    #[source]
    source: io::Error,
}

#[derive(Debug, Error, Diagnostic)]
enum UsageError {
    #[error("-o takes a single input, got {0}")]
    #[diagnostic(code(cnd::usage), help("use --out-dir for several inputs"))]
    OutputWithManyInputs(usize),

    #[error("{0} inputs need --out-dir")]
    #[diagnostic(code(cnd::usage))]
    ManyInputsToStdout(usize),

    #[error("{failed} of {total} units failed to translate")]
    #[diagnostic(code(cnd::translate))]
    UnitsFailed { failed: usize, total: usize },
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.cmd {
        Cmd::Translate {
            files,
            output,
            out_dir,
            flags,
            cpp,
        } => cmd_translate(&files, output.as_deref(), out_dir.as_deref(), &flags, &cpp),
        Cmd::Shapes { path, json, flags, cpp } => cmd_shapes(&path, json, &flags, &cpp),
        Cmd::Scan { path } => cmd_scan(&path),
        Cmd::Cc {
            flags,
            compiler,
            args,
        } => {
            // The compiler preprocesses the translated copies itself.
            let cpp = CppFlags::default();
            let code = frontend::run(&compiler, &args, |p| translate_file(p, &flags, &cpp))?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("CND_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn cmd_translate(
    files: &[PathBuf],
    output: Option<&Path>,
    out_dir: Option<&Path>,
    flags: &TranslateFlags,
    cpp: &CppFlags,
) -> miette::Result<()> {
    if output.is_some() && files.len() > 1 {
        return Err(UsageError::OutputWithManyInputs(files.len()).into());
    }
    if output.is_none() && out_dir.is_none() && files.len() > 1 {
        return Err(UsageError::ManyInputsToStdout(files.len()).into());
    }

    let started = Instant::now();
    let results: Vec<(&PathBuf, miette::Result<String>)> = files
        .par_iter()
        .map(|path| (path, translate_file(path, flags, cpp)))
        .collect();

    let total = results.len();
    let mut failed = Vec::new();
    for (path, result) in results {
        let text = match result {
            Ok(text) => text,
            Err(e) => {
                failed.push(e);
                continue;
            }
        };
        match (output, out_dir) {
            (Some(out), _) => write_file(out, &text)?,
            (None, Some(dir)) => {
                let name = path.file_name().ok_or_else(|| miette::miette!("{} has no file name", display_path(path)))?;
                fs::create_dir_all(dir).map_err(|source| IoError {
                    action: "create",
                    path: display_path(dir),
                    source,
                })?;
                write_file(&dir.join(name), &text)?;
            }
            (None, None) => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(text.as_bytes()).into_diagnostic()?;
                stdout.flush().into_diagnostic()?;
            }
        }
    }
    info!(units = total, elapsed_ms = started.elapsed().as_millis() as u64, "translated");

    match failed.len() {
        0 => Ok(()),
        1 if total == 1 => Err(failed.remove(0)),
        n => {
            for e in failed {
                eprintln!("{e:?}");
            }
            Err(UsageError::UnitsFailed { failed: n, total }.into())
        }
    }
}

fn cmd_shapes(path: &Path, json: bool, flags: &TranslateFlags, cpp: &CppFlags) -> miette::Result<()> {
    let config = load_config(path, flags)?;
    let src = load_unit(path, cpp)?;
    let name = display_path(path);

    match cnd_core::translate_unit(&name, &src, &config) {
        Ok(t) => {
            let report = report::ShapesReport::new(name, Ok(t.shapes));
            if json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.render_text());
            }
            Ok(())
        }
        Err(e) => {
            if json {
                let report = report::ShapesReport::new(name.clone(), Err(e.to_string()));
                println!("{}", report.to_json()?);
            }
            Err(with_source(e, &name, src))
        }
    }
}

fn cmd_scan(path: &Path) -> miette::Result<()> {
    let src = read_source(path)?;
    let source = NamedSource::new(display_path(path), src.clone());
    let unit = cnd_parse::scan_source(&src).map_err(|e| e.with_source_code(source))?;
    print!("{}", cnd_parse::format_fragments(&unit, &src));
    Ok(())
}

fn load_config(path: &Path, flags: &TranslateFlags) -> miette::Result<TranslateConfig> {
    let resolved = manifest::load_resolved_manifest(path)?;
    if let Some(m) = &resolved.manifest_path {
        debug!(unit = %path.display(), manifest = %m.display(), "using manifest");
    }
    let mut config = resolved.translate;
    flags.apply(&mut config);
    Ok(config)
}

fn translate_file(path: &Path, flags: &TranslateFlags, cpp: &CppFlags) -> miette::Result<String> {
    let config = load_config(path, flags)?;
    let src = load_unit(path, cpp)?;
    let name = display_path(path);
    debug!(unit = name.as_str(), bytes = src.len(), "translating");
    cnd_core::translate(&name, &src, &config).map_err(|e| with_source(e, &name, src))
}

fn with_source(e: TranslateError, name: &str, src: String) -> miette::Report {
    miette::Report::new(e).with_source_code(NamedSource::new(name, src))
}

/// The text to translate: the file itself, or its preprocessed form with `-E`.
fn load_unit(path: &Path, cpp: &CppFlags) -> miette::Result<String> {
    if !cpp.preprocess {
        return read_source(path);
    }
    let pre = preprocess::Preprocessor::new(cpp.cpp.as_deref(), &cpp.includes, &cpp.defines)?;
    Ok(pre.run(path)?)
}

fn read_source(path: &Path) -> miette::Result<String> {
    fs::read_to_string(path).map_err(|source| {
        IoError {
            action: "read",
            path: display_path(path),
            source,
        }
        .into()
    })
}

fn write_file(path: &Path, text: &str) -> miette::Result<()> {
    fs::write(path, text).map_err(|source| {
        IoError {
            action: "write",
            path: display_path(path),
            source,
        }
        .into()
    })
}

fn display_path(p: &Path) -> String {
    p.to_string_lossy().to_string()
}
