//! Read VCS coordinates straight from a `.git` directory.
//!
//! No `git` binary is required: HEAD, loose refs, `packed-refs` and the
//! `[remote "origin"]` url are parsed from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StagingError};
use crate::model::Vcs;

pub const DOT_GIT: &str = ".git";

/// Walk upward from `start` until a directory containing `.git` is found.
pub fn find_dot_git(start: &Path) -> Result<PathBuf> {
    for dir in start.ancestors() {
        let candidate = dir.join(DOT_GIT);
        if candidate.exists() {
            return resolve_git_dir(&candidate);
        }
    }
    Err(StagingError::Git(format!(
        "no {DOT_GIT} found in {} or any parent directory",
        start.display()
    )))
}

/// A `.git` file (worktree or submodule) points at the real git dir.
pub(crate) fn resolve_git_dir(dot_git: &Path) -> Result<PathBuf> {
    if dot_git.is_dir() {
        return Ok(dot_git.to_path_buf());
    }
    let content = read(dot_git)?;
    let target = content
        .lines()
        .find_map(|line| line.strip_prefix("gitdir:"))
        .map(str::trim)
        .ok_or_else(|| StagingError::Git(format!("{} is not a git dir", dot_git.display())))?;
    let target = Path::new(target);
    Ok(match dot_git.parent() {
        Some(parent) if target.is_relative() => parent.join(target),
        _ => target.to_path_buf(),
    })
}

/// Current revision and origin url of the repository at `dot_git`.
pub fn read_vcs(dot_git: &Path) -> Result<Vcs> {
    let dot_git = resolve_git_dir(dot_git)?;
    Ok(Vcs::new(read_origin_url(&dot_git)?, read_revision(&dot_git)?))
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| StagingError::Git(format!("failed to read {}: {e}", path.display())))
}

fn read_revision(dot_git: &Path) -> Result<String> {
    let head = read(&dot_git.join("HEAD"))?;
    let head = head.trim();
    let Some(reference) = head.strip_prefix("ref:").map(str::trim) else {
        // Detached HEAD holds the revision itself.
        return Ok(head.to_string());
    };

    let loose = dot_git.join(reference);
    if loose.is_file() {
        return Ok(read(&loose)?.trim().to_string());
    }

    let packed_path = dot_git.join("packed-refs");
    if packed_path.is_file() {
        let packed = read(&packed_path)?;
        for line in packed.lines() {
            if line.starts_with('#') || line.starts_with('^') {
                continue;
            }
            if let Some((sha, name)) = line.split_once(' ') {
                if name.trim() == reference {
                    return Ok(sha.to_string());
                }
            }
        }
    }

    Err(StagingError::Git(format!(
        "cannot resolve {reference} in {}",
        dot_git.display()
    )))
}

/// Empty when the repository has no `origin` remote.
fn read_origin_url(dot_git: &Path) -> Result<String> {
    let config = read(&dot_git.join("config"))?;
    let mut in_origin = false;
    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_origin = line == "[remote \"origin\"]";
            continue;
        }
        if !in_origin {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "url" {
                return Ok(value.trim().to_string());
            }
        }
    }
    Ok(String::new())
}
