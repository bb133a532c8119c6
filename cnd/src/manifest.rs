#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use cnd_core::TranslateConfig;
use miette::Diagnostic;
use thiserror::Error;
use tracing::debug;

pub const MANIFEST_NAME: &str = "cnd.toml";

#[derive(Debug, Error, Diagnostic)]
#[error("manifest error: {message}")]
#[diagnostic(code(cnd::manifest))]
pub struct ManifestError {
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedManifest {
    pub manifest_path: Option<PathBuf>,
    /// The `[translate]` table, defaults filled in.
    pub translate: TranslateConfig,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    #[serde(default)]
    translate: Option<TranslateConfig>,
}

/// Nearest `cnd.toml` at or above `start`.
pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    let mut cur = if start.is_file() {
        start.parent()?.to_path_buf()
    } else {
        start
    };

    loop {
        let candidate = cur.join(MANIFEST_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        match cur.parent() {
            Some(p) => cur = p.to_path_buf(),
            None => return None,
        }
    }
}

/// Settings that apply to the unit at `start`. Without a manifest these are
/// the defaults.
pub fn load_resolved_manifest(start: &Path) -> Result<ResolvedManifest, ManifestError> {
    let Some(manifest_path) = find_manifest(start) else {
        return Ok(ResolvedManifest::default());
    };

    let raw = fs::read_to_string(&manifest_path).map_err(|e| ManifestError {
        message: format!("failed to read {}: {e}", manifest_path.display()),
    })?;
    let translate = parse_manifest(&raw).map_err(|e| ManifestError {
        message: format!("failed to parse {}: {e}", manifest_path.display()),
    })?;

    debug!(manifest = %manifest_path.display(), "loaded manifest");
    Ok(ResolvedManifest {
        manifest_path: Some(manifest_path),
        translate,
    })
}

fn parse_manifest(raw: &str) -> Result<TranslateConfig, toml::de::Error> {
    let parsed: Manifest = toml::from_str(raw)?;
    Ok(parsed.translate.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cnd_core::ShadowPolicy;

    #[test]
    fn missing_table_means_defaults() {
        assert_eq!(parse_manifest("").unwrap(), TranslateConfig::default());
    }

    #[test]
    fn translate_table_overrides_defaults() {
        let config = parse_manifest("[translate]\nbounds_check = true\nshadowing = \"forbid\"\n").unwrap();
        assert!(config.bounds_check);
        assert_eq!(config.shadowing, ShadowPolicy::Forbid);
        assert!(config.preamble);
    }

    #[test]
    fn unknown_tables_are_rejected() {
        assert!(parse_manifest("[project]\nname = \"x\"\n").is_err());
        assert!(parse_manifest("[translate]\nbounds = true\n").is_err());
    }

    #[test]
    fn nearest_manifest_wins() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(root.path().join(MANIFEST_NAME), "[translate]\npreamble = false\n").unwrap();
        let unit = nested.join("u.c");
        fs::write(&unit, "int x;\n").unwrap();

        let resolved = load_resolved_manifest(&unit).unwrap();
        assert!(!resolved.translate.preamble);

        fs::write(nested.join(MANIFEST_NAME), "[translate]\nbounds_check = true\n").unwrap();
        let resolved = load_resolved_manifest(&unit).unwrap();
        assert!(resolved.translate.preamble);
        assert!(resolved.translate.bounds_check);
        assert_eq!(
            resolved.manifest_path.unwrap().canonicalize().unwrap(),
            nested.join(MANIFEST_NAME).canonicalize().unwrap()
        );
    }
}
