//! Issue keys mentioned in recent commit messages.
//!
//! Settings come from the `[issues]` table of a TOML file:
//!
//! ```toml
//! [issues]
//! tracker_name = "JIRA"
//! regexp = '^(\w+-\d+)\s+(.+)$'
//! key_group_index = 1
//! summary_group_index = 2
//! tracker_url = "https://jira.example.com/browse"
//! aggregate = true
//! aggregation_status = "Released"
//! ```
//!
//! Subjects are read with `git log`, bounded by `log_limit` and optionally by
//! the revision of the previously published build.

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, StagingError};
use crate::git;
use crate::model::{AffectedIssue, IssueTracker, Issues};

/// Commits inspected when the config does not say otherwise.
pub const DEFAULT_LOG_LIMIT: usize = 100;

fn default_log_limit() -> usize {
    DEFAULT_LOG_LIMIT
}

/// How to find issue keys in commit subjects.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssuesConfig {
    pub tracker_name: String,
    pub regexp: String,
    pub key_group_index: usize,
    pub summary_group_index: usize,
    /// Issue urls are this plus the key. A trailing `/` is added if missing.
    #[serde(default)]
    pub tracker_url: String,
    #[serde(default)]
    pub aggregate: bool,
    #[serde(default)]
    pub aggregation_status: String,
    #[serde(default = "default_log_limit")]
    pub log_limit: usize,
}

#[derive(Deserialize)]
struct IssuesFile {
    issues: Option<IssuesConfig>,
}

impl IssuesConfig {
    /// Parse the `[issues]` table of a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: IssuesFile = toml::from_str(content)
            .map_err(|e| StagingError::Config(format!("invalid issues config: {e}")))?;
        let mut config = file.issues.ok_or_else(|| {
            StagingError::Config("config file must contain [issues]".to_string())
        })?;
        if config.tracker_name.trim().is_empty() {
            return Err(StagingError::Config(
                "issues.tracker_name must not be empty".to_string(),
            ));
        }
        if !config.tracker_url.is_empty() && !config.tracker_url.ends_with('/') {
            config.tracker_url.push('/');
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StagingError::io(path, e))?;
        Self::from_toml(&content)
    }

    fn compile(&self) -> Result<Regex> {
        Regex::new(&self.regexp).map_err(|e| {
            StagingError::Config(format!("invalid issues.regexp {:?}: {e}", self.regexp))
        })
    }

    /// Wrap found issues with the tracker settings.
    pub fn to_issues(&self, affected_issues: Vec<AffectedIssue>) -> Issues {
        Issues {
            tracker: Some(IssueTracker {
                name: self.tracker_name.clone(),
                version: String::new(),
            }),
            aggregate_build_issues: self.aggregate,
            aggregation_build_status: self.aggregation_status.clone(),
            affected_issues,
        }
    }
}

/// Match every line of `log` against the configured expression.
///
/// The first mention of a key wins. Fails when the expression has fewer
/// capture groups than the configured indices require.
pub fn parse_issues(log: &str, config: &IssuesConfig) -> Result<Vec<AffectedIssue>> {
    let regex = config.compile()?;
    let groups = regex.captures_len();
    if config.key_group_index >= groups || config.summary_group_index >= groups {
        return Err(StagingError::Config(format!(
            "issues.regexp has {} capturing groups; key_group_index and summary_group_index \
             must both refer to one of them",
            groups - 1
        )));
    }

    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for line in log.lines() {
        let Some(caps) = regex.captures(line) else {
            continue;
        };
        let Some(key) = caps.get(config.key_group_index).map(|m| m.as_str()) else {
            continue;
        };
        if key.is_empty() || !seen.insert(key.to_string()) {
            continue;
        }
        let summary = caps
            .get(config.summary_group_index)
            .map_or("", |m| m.as_str());
        let url = if config.tracker_url.is_empty() {
            String::new()
        } else {
            format!("{}{key}", config.tracker_url)
        };
        debug!(event = "issues.found", key = %key);
        found.push(AffectedIssue {
            key: key.to_string(),
            url,
            summary: summary.trim().to_string(),
            aggregated: false,
        });
    }
    Ok(found)
}

/// Run `git log` on the repository at `dot_git` and collect its issues.
///
/// With `since`, only commits after that revision are read.
pub fn collect_issues(
    dot_git: &Path,
    config: &IssuesConfig,
    since: Option<&str>,
) -> Result<Issues> {
    let dot_git = git::resolve_git_dir(dot_git)?;
    let mut args = vec![
        "log".to_string(),
        "--pretty=format:%s".to_string(),
        format!("-{}", config.log_limit),
    ];
    if let Some(rev) = since.filter(|r| !r.is_empty()) {
        args.push(format!("{rev}.."));
    }

    let output = Command::new("git")
        .arg("--git-dir")
        .arg(&dot_git)
        .args(&args)
        .output()
        .map_err(|e| StagingError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StagingError::Git(format!("git log failed: {}", stderr.trim())));
    }

    let log = String::from_utf8_lossy(&output.stdout);
    let affected = parse_issues(&log, config)?;
    Ok(config.to_issues(affected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    const CONFIG: &str = r#"
        [issues]
        tracker_name = "JIRA"
        regexp = '^(\w+-\d+)\s+(.+)$'
        key_group_index = 1
        summary_group_index = 2
        tracker_url = "https://jira.example.com/browse"
        aggregate = true
        aggregation_status = "Released"
    "#;

    fn config() -> IssuesConfig {
        IssuesConfig::from_toml(CONFIG).unwrap()
    }

    fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn make_git_repo(subjects: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        for subject in subjects {
            run_git(dir.path(), &["commit", "--allow-empty", "-m", subject]);
        }
        dir
    }

    #[test]
    fn config_defaults_and_trailing_slash() {
        let config = config();
        assert_eq!(config.tracker_url, "https://jira.example.com/browse/");
        assert_eq!(config.log_limit, DEFAULT_LOG_LIMIT);
        assert!(config.aggregate);
    }

    #[test]
    fn config_requires_issues_table_and_fields() {
        assert!(IssuesConfig::from_toml("[other]\nx = 1\n").is_err());
        assert!(IssuesConfig::from_toml("[issues]\ntracker_name = \"JIRA\"\n").is_err());
    }

    #[test]
    fn parses_keys_and_summaries() {
        let log = "APP-2 add export\nchore: bump deps\nAPP-1 fix login\nAPP-2 follow-up\n";
        let found = parse_issues(log, &config()).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].key, "APP-2");
        assert_eq!(found[0].summary, "add export");
        assert_eq!(found[0].url, "https://jira.example.com/browse/APP-2");
        assert_eq!(found[1].key, "APP-1");
    }

    #[test]
    fn group_index_out_of_range_is_an_error() {
        let mut config = config();
        config.regexp = r"^(\w+-\d+)".to_string();
        let err = parse_issues("APP-1 fix", &config).unwrap_err();
        assert!(err.to_string().contains("capturing groups"), "{err}");
    }

    #[test]
    fn collects_from_git_log() {
        let repo = make_git_repo(&["APP-1 fix login", "chore: tidy", "APP-2 add export"]);
        let issues = collect_issues(&repo.path().join(".git"), &config(), None).unwrap();

        assert_eq!(issues.tracker_name(), "JIRA");
        assert_eq!(issues.aggregation_build_status, "Released");
        let keys: Vec<_> = issues.affected_issues.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["APP-2", "APP-1"]);
    }

    #[test]
    fn since_revision_limits_the_log() {
        let repo = make_git_repo(&["APP-1 fix login"]);
        let previous = run_git(repo.path(), &["rev-parse", "HEAD"]);
        run_git(repo.path(), &["commit", "--allow-empty", "-m", "APP-3 new work"]);

        let issues =
            collect_issues(&repo.path().join(".git"), &config(), Some(&previous)).unwrap();
        let keys: Vec<_> = issues.affected_issues.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["APP-3"]);
    }

    #[test]
    fn unknown_since_revision_fails() {
        let repo = make_git_repo(&["APP-1 fix login"]);
        let since = Some("0123456789abcdef0123456789abcdef01234567");
        assert!(matches!(
            collect_issues(&repo.path().join(".git"), &config(), since),
            Err(StagingError::Git(_))
        ));
    }
}
