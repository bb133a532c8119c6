#![forbid(unsafe_code)]

//! `-E`: run the C preprocessor over a unit before it is translated, so
//! macros in bounds and indices are expanded first.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, Diagnostic)]
pub enum PreprocessError {
    #[error("the preprocessor command is empty")]
    #[diagnostic(code(cnd::usage), help("pass a command, for example `--cpp \"gcc -E\"`"))]
    EmptyCommand,

    #[error("failed to run preprocessor '{program}'")]
    #[diagnostic(code(cnd::io), help("choose another one with --cpp or CND_CPP"))]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("preprocessing {path} failed ({status})")]
    #[diagnostic(code(cnd::preprocess))]
    Failed {
        path: String,
        status: String,
        #[help]
        stderr: Option<String>,
    },
}

/// A preprocessor command line, minus the unit it is run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preprocessor {
    program: String,
    args: Vec<String>,
}

impl Preprocessor {
    /// `command` or, failing that, `$CND_CPP`, `$CPP` and finally `cpp`,
    /// followed by `-I` and `-D` options in the order given.
    pub fn new(command: Option<&str>, includes: &[PathBuf], defines: &[String]) -> Result<Self, PreprocessError> {
        let command = command
            .map(str::to_string)
            .or_else(|| env::var("CND_CPP").ok())
            .or_else(|| env::var("CPP").ok())
            .unwrap_or_else(|| "cpp".to_string());

        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next().ok_or(PreprocessError::EmptyCommand)?;
        let mut args: Vec<String> = words.collect();
        for dir in includes {
            args.push("-I".to_string());
            args.push(dir.to_string_lossy().into_owned());
        }
        for def in defines {
            args.push("-D".to_string());
            args.push(def.clone());
        }
        Ok(Self { program, args })
    }

    /// The preprocessed text of `path`.
    pub fn run(&self, path: &Path) -> Result<String, PreprocessError> {
        info!(program = self.program.as_str(), args = ?self.args, unit = %path.display(), "preprocessing");
        let out = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .map_err(|source| PreprocessError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            return Err(PreprocessError::Failed {
                path: path.to_string_lossy().into_owned(),
                status: out.status.to_string(),
                stderr: (!stderr.is_empty()).then_some(stderr),
            });
        }
        let text = String::from_utf8_lossy(&out.stdout).into_owned();
        debug!(unit = %path.display(), bytes = text.len(), "preprocessed");
        Ok(text)
    }
}
