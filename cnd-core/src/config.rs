#![forbid(unsafe_code)]

use std::str::FromStr;

use serde::Deserialize;

/// Knobs for one translation. Deserializes from the `[translate]` table of a
/// `cnd.toml`; absent keys keep their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranslateConfig {
    /// Wrap every normalized index in a runtime range check.
    pub bounds_check: bool,
    /// Follow heap allocation helpers with a NULL check.
    pub check_allocations: bool,
    /// Emit the version macros (and any runtime support) ahead of the unit.
    pub preamble: bool,
    /// Emit `#line` after the preamble so host diagnostics point at the input.
    pub line_directives: bool,
    pub shadowing: ShadowPolicy,
    pub single_bound: SingleBound,
    /// Bind non-literal block-scope bounds to `const` locals at the declaration.
    pub materialize_bounds: bool,
    /// C type of iteration variables, materialized bounds and checked indices.
    pub index_type: String,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            bounds_check: false,
            check_allocations: false,
            preamble: true,
            line_directives: true,
            shadowing: ShadowPolicy::Allow,
            single_bound: SingleBound::Inclusive,
            materialize_bounds: false,
            index_type: "long".to_string(),
        }
    }
}

/// What happens when a name that already has a visible shape is declared again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShadowPolicy {
    /// Later declarations shadow earlier ones silently.
    #[default]
    Allow,
    /// Shadowing an outer scope is fine; redeclaring within one scope is not.
    ForbidSameScope,
    /// Any redeclaration of a visible name is an error.
    Forbid,
}

/// How an axis written as a single bound `b` is read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SingleBound {
    /// `b` is the inclusive upper bound: `0..=b`.
    #[default]
    Inclusive,
    /// `b` is the extent, as in a C array declarator: `0..=b-1`.
    Extent,
}

impl FromStr for ShadowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(ShadowPolicy::Allow),
            "forbid-same-scope" => Ok(ShadowPolicy::ForbidSameScope),
            "forbid" => Ok(ShadowPolicy::Forbid),
            other => Err(format!(
                "unknown shadowing policy '{other}' (expected allow, forbid-same-scope or forbid)"
            )),
        }
    }
}

impl FromStr for SingleBound {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inclusive" => Ok(SingleBound::Inclusive),
            "extent" => Ok(SingleBound::Extent),
            other => Err(format!(
                "unknown single-bound mode '{other}' (expected inclusive or extent)"
            )),
        }
    }
}
