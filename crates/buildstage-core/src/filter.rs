//! Include/exclude glob filtering of build environment variables.
//!
//! Patterns are matched case-insensitively against the key with the
//! `buildInfo.env.` prefix stripped. A key survives when it matches any
//! include pattern (or no include patterns are configured) and no exclude
//! pattern. Exclude always wins.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{Result, StagingError};
use crate::model::{Env, ENV_PREFIX};

/// Separator between patterns in a configured pattern list.
pub const PATTERN_SEPARATOR: char = ';';

/// Split a `*password*;*secret*` style list, dropping empty entries.
pub fn parse_patterns(list: &str) -> Vec<String> {
    list.split(PATTERN_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Compiled include/exclude rules.
#[derive(Debug, Clone)]
pub struct EnvFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl EnvFilter {
    /// Compile the rules. An empty include list keeps every key.
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self> {
        let include = if include.is_empty() {
            None
        } else {
            Some(compile(include)?)
        };
        Ok(EnvFilter {
            include,
            exclude: compile(exclude)?,
        })
    }

    /// Compile from semicolon-separated pattern lists.
    pub fn from_lists(include: &str, exclude: &str) -> Result<Self> {
        let include = parse_patterns(include);
        let exclude = parse_patterns(exclude);
        Self::new(include.as_slice(), exclude.as_slice())
    }

    /// Keep everything.
    pub fn allow_all() -> Self {
        EnvFilter {
            include: None,
            exclude: GlobSet::empty(),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        let bare = key.strip_prefix(ENV_PREFIX).unwrap_or(key);
        let included = self
            .include
            .as_ref()
            .map_or(true, |set| set.is_match(bare));
        included && !self.exclude.is_match(bare)
    }

    pub fn apply(&self, env: &Env) -> Env {
        env.iter()
            .filter(|(k, _)| self.matches(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| StagingError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| StagingError::InvalidPattern {
        pattern: patterns
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join(";"),
        source,
    })
}

/// One-shot filter: compile `include`/`exclude` and apply them to `env`.
pub fn filter<S: AsRef<str>>(env: &Env, include: &[S], exclude: &[S]) -> Result<Env> {
    Ok(EnvFilter::new(include, exclude)?.apply(env))
}
