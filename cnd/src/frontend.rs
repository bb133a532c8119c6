#![forbid(unsafe_code)]

//! `cnd cc`: stand in front of a C compiler, translating each C source on
//! its command line into a temporary file first.

use std::io::{self, Write};
use std::path::Path;
use std::process::Command;

use miette::{Diagnostic, IntoDiagnostic};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, Diagnostic)]
pub enum FrontendError {
    #[error("-o<NAME> is required with -c")]
    #[diagnostic(code(cnd::frontend), help("name the object file, for example `-o unit.o`"))]
    MissingOutput,

    #[error("failed to run compiler '{compiler}'")]
    #[diagnostic(
        code(cnd::io),
        help("the compiler command must be the first argument after `cc`")
    )]
    Spawn {
        compiler: String,
        #[source]
        source: io::Error,
    },
}

/// Positions of the arguments naming C sources to translate.
pub fn source_args(args: &[String]) -> Result<Vec<usize>, FrontendError> {
    let mut sources = Vec::new();
    let mut compile_only = false;
    let mut named_output = false;
    let mut after_dash_o = false;

    for (i, arg) in args.iter().enumerate() {
        if after_dash_o {
            after_dash_o = false;
            continue;
        }
        if arg == "-c" {
            compile_only = true;
        } else if let Some(rest) = arg.strip_prefix("-o") {
            named_output = true;
            after_dash_o = rest.is_empty();
        } else if !arg.starts_with('-') && arg.ends_with(".c") {
            sources.push(i);
        }
    }

    if compile_only && !named_output {
        return Err(FrontendError::MissingOutput);
    }
    Ok(sources)
}

/// Translate the sources among `args` with `translate`, run `compiler` on the
/// rewritten command line and return its exit code. Each temporary sits in
/// the directory of its source so quoted `#include`s still resolve, and lives
/// until the compiler has finished.
pub fn run(
    compiler: &str,
    args: &[String],
    translate: impl Fn(&Path) -> miette::Result<String>,
) -> miette::Result<i32> {
    let sources = source_args(args)?;
    let mut argv = args.to_vec();
    let mut temps: Vec<NamedTempFile> = Vec::with_capacity(sources.len());

    for i in sources {
        let source = Path::new(&args[i]);
        let out = translate(source)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".cnd-")
            .suffix(".c")
            .tempfile_in(source_dir(source))
            .into_diagnostic()?;
        tmp.write_all(out.as_bytes()).into_diagnostic()?;
        tmp.flush().into_diagnostic()?;
        debug!(source = args[i].as_str(), temp = %tmp.path().display(), "translated for compiler");
        argv[i] = tmp.path().to_string_lossy().into_owned();
        temps.push(tmp);
    }

    info!(compiler, args = ?argv, "running compiler");
    let status = Command::new(compiler)
        .args(&argv)
        .status()
        .map_err(|source| FrontendError::Spawn {
            compiler: compiler.to_string(),
            source,
        })?;
    drop(temps);

    Ok(status.code().unwrap_or(1))
}

fn source_dir(source: &Path) -> &Path {
    match source.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn finds_c_sources_but_not_outputs() {
        let a = args(&["-O2", "main.c", "-o", "prog.c", "lib.c", "-Iinc", "x.o"]);
        assert_eq!(source_args(&a).unwrap(), vec![1, 4]);

        let a = args(&["-oprog", "main.c"]);
        assert_eq!(source_args(&a).unwrap(), vec![1]);
    }

    #[test]
    fn compile_only_needs_an_output_name() {
        assert!(matches!(
            source_args(&args(&["-c", "main.c"])),
            Err(FrontendError::MissingOutput)
        ));
        assert!(source_args(&args(&["-c", "main.c", "-o", "main.o"])).is_ok());
        assert!(source_args(&args(&["-c", "main.c", "-omain.o"])).is_ok());
    }

    #[test]
    fn translation_failures_stop_before_the_compiler() {
        let result = run("definitely-not-a-compiler", &args(&["bad.c"]), |_| {
            Err(miette::miette!("no"))
        });
        assert_eq!(result.unwrap_err().to_string(), "no");
    }

    #[test]
    fn missing_compilers_are_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let unit = tmp.path().join("u.c").to_string_lossy().into_owned();
        let err = run("definitely-not-a-compiler-cnd", &args(&[&unit]), |_| Ok("int x;\n".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("definitely-not-a-compiler-cnd"));
    }

    #[test]
    fn temporaries_sit_beside_their_sources() {
        assert_eq!(source_dir(Path::new("u.c")), Path::new("."));
        assert_eq!(source_dir(Path::new("src/u.c")), Path::new("src"));
        assert_eq!(source_dir(Path::new("/abs/dir/u.c")), Path::new("/abs/dir"));
    }
}
