//! Local files matched by glob patterns, and their checksums.
//!
//! A pattern is split into a literal root (the leading components without
//! glob syntax) and the full glob. Only the root is walked, so `libs/*.jar`
//! never descends into unrelated trees. `*` does not cross `/`; use `**`
//! for recursive matches. A pattern without glob syntax names a file, or a
//! directory whose files are all taken.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use sha1::{Digest, Sha1};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, StagingError};

const GLOB_META: &[char] = &['*', '?', '[', '{'];

const READ_BUFFER: usize = 64 * 1024;

/// Hex-encoded digests of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksums {
    pub sha1: String,
    pub md5: String,
}

/// Compute sha1 and md5 in one pass over the file.
pub fn checksums(path: &Path) -> io::Result<Checksums> {
    let mut file = File::open(path)?;
    let mut sha = Sha1::new();
    let mut md5 = md5::Context::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sha.update(&buf[..n]);
        md5.consume(&buf[..n]);
    }
    Ok(Checksums {
        sha1: hex::encode(sha.finalize()),
        md5: format!("{:x}", md5.compute()),
    })
}

fn has_glob(component: &str) -> bool {
    component.contains(GLOB_META)
}

/// Longest leading run of components free of glob syntax.
fn literal_root(pattern: &str) -> PathBuf {
    let mut root = PathBuf::new();
    for component in Path::new(pattern).components() {
        if let Component::Normal(part) = component {
            if has_glob(&part.to_string_lossy()) {
                break;
            }
        }
        root.push(component);
    }
    root
}

fn compile(pattern: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|source| StagingError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Regular files under `root`, relative to the working directory when
/// `root` is empty.
fn walk_files(root: &Path) -> impl Iterator<Item = PathBuf> {
    let (start, strip) = if root.as_os_str().is_empty() {
        (PathBuf::from("."), true)
    } else {
        (root.to_path_buf(), false)
    };
    WalkDir::new(start)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(event = "files.walk_error", error = %err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(move |entry| {
            let path = entry.into_path();
            if strip {
                path.strip_prefix(".").map(Path::to_path_buf).unwrap_or(path)
            } else {
                path
            }
        })
}

/// Every regular file matched by any of `patterns`, sorted and without
/// duplicates. Patterns that match nothing are not an error.
pub fn collect_paths<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathBuf>> {
    let mut found = BTreeSet::new();
    for pattern in patterns {
        let pattern = pattern.as_ref().trim();
        if pattern.is_empty() {
            continue;
        }

        if !has_glob(pattern) {
            let path = Path::new(pattern);
            if path.is_file() {
                found.insert(path.to_path_buf());
            } else if path.is_dir() {
                found.extend(walk_files(path));
            } else {
                debug!(event = "files.no_match", pattern = %pattern);
            }
            continue;
        }

        let matcher = compile(pattern)?;
        let before = found.len();
        found.extend(walk_files(&literal_root(pattern)).filter(|p| matcher.is_match(p)));
        debug!(
            event = "files.matched",
            pattern = %pattern,
            files = found.len() - before,
        );
    }
    Ok(found.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for rel in ["libs/a.jar", "libs/b.txt", "libs/nested/c.jar", "other/d.jar"] {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, rel).unwrap();
        }
        dir
    }

    fn names(paths: &[PathBuf], root: &Path) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn known_digests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, "hello").unwrap();

        let sums = checksums(&path).unwrap();
        assert_eq!(sums.sha1, "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
        assert_eq!(sums.md5, "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn single_star_stays_in_one_directory() {
        let dir = tree();
        let pattern = format!("{}/libs/*.jar", dir.path().display());
        let paths = collect_paths(&[pattern]).unwrap();
        assert_eq!(names(&paths, dir.path()), vec!["libs/a.jar"]);
    }

    #[test]
    fn double_star_recurses() {
        let dir = tree();
        let pattern = format!("{}/**/*.jar", dir.path().display());
        let paths = collect_paths(&[pattern]).unwrap();
        assert_eq!(
            names(&paths, dir.path()),
            vec!["libs/a.jar", "libs/nested/c.jar", "other/d.jar"]
        );
    }

    #[test]
    fn overlapping_patterns_are_deduplicated() {
        let dir = tree();
        let root = dir.path().display();
        let patterns = vec![
            format!("{root}/libs/*.jar"),
            format!("{root}/libs/a.jar"),
            format!("{root}/libs"),
        ];
        let paths = collect_paths(patterns.as_slice()).unwrap();
        assert_eq!(
            names(&paths, dir.path()),
            vec!["libs/a.jar", "libs/b.txt", "libs/nested/c.jar"]
        );
    }

    #[test]
    fn missing_literal_matches_nothing() {
        let dir = tree();
        let pattern = format!("{}/nope.jar", dir.path().display());
        assert!(collect_paths(&[pattern]).unwrap().is_empty());
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let dir = tree();
        let pattern = format!("{}/libs/[a.jar", dir.path().display());
        assert!(matches!(
            collect_paths(&[pattern]),
            Err(StagingError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn literal_root_stops_at_first_glob() {
        assert_eq!(literal_root("libs/*/x.jar"), PathBuf::from("libs"));
        assert_eq!(literal_root("**/*.jar"), PathBuf::new());
        assert_eq!(literal_root("/a/b/{x,y}.jar"), PathBuf::from("/a/b"));
    }
}
