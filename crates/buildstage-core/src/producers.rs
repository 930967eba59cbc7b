//! Build steps that contribute partials to a staged build.
//!
//! Every producer records the build start time first, so whichever step
//! runs earliest initializes the build.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Result, StagingError};
use crate::files;
use crate::git;
use crate::identifier::BuildId;
use crate::issues::{self, IssuesConfig};
use crate::model::{Dependency, Env, PartialRecord, StagedArtifact, Vcs, ENV_PREFIX};
use crate::staging::StagingStore;

fn stage(store: &dyn StagingStore, id: &BuildId, record: PartialRecord) -> Result<PathBuf> {
    store.write_general_details_if_absent(id)?;
    store.append_partial(id, &record)
}

fn with_module(record: PartialRecord, module: Option<&str>) -> PartialRecord {
    match module {
        Some(m) if !m.is_empty() => record.with_module(m),
        _ => record,
    }
}

/// Snapshot the current process environment.
pub fn collect_env(store: &dyn StagingStore, id: &BuildId) -> Result<PathBuf> {
    collect_env_from(store, id, std::env::vars())
}

/// Stage `vars` as an env partial, prefixing each key with [`ENV_PREFIX`].
pub fn collect_env_from<I>(store: &dyn StagingStore, id: &BuildId, vars: I) -> Result<PathBuf>
where
    I: IntoIterator<Item = (String, String)>,
{
    let env: Env = vars
        .into_iter()
        .map(|(key, value)| (format!("{ENV_PREFIX}{key}"), value))
        .collect();
    stage(store, id, PartialRecord::env(env))
}

pub fn add_artifacts(
    store: &dyn StagingStore,
    id: &BuildId,
    module: Option<&str>,
    artifacts: Vec<StagedArtifact>,
) -> Result<PathBuf> {
    stage(store, id, with_module(PartialRecord::artifacts(artifacts), module))
}

pub fn add_dependencies(
    store: &dyn StagingStore,
    id: &BuildId,
    module: Option<&str>,
    dependencies: Vec<Dependency>,
) -> Result<PathBuf> {
    stage(
        store,
        id,
        with_module(PartialRecord::dependencies(dependencies), module),
    )
}

/// Outcome of [`add_dependencies_from_paths`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyCollection {
    /// Staged partial, absent when no file could be hashed.
    pub path: Option<PathBuf>,
    pub added: usize,
    pub failed: usize,
}

/// Stage every local file matched by `patterns` as a dependency.
///
/// The dependency id is the file name. Files that cannot be read are
/// logged and counted in [`DependencyCollection::failed`]; the rest are
/// still staged.
pub fn add_dependencies_from_paths<S: AsRef<str>>(
    store: &dyn StagingStore,
    id: &BuildId,
    module: Option<&str>,
    patterns: &[S],
) -> Result<DependencyCollection> {
    store.write_general_details_if_absent(id)?;
    let paths = files::collect_paths(patterns)?;

    let mut collection = DependencyCollection::default();
    let mut dependencies = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        match files::checksums(&path) {
            Ok(sums) => dependencies.push(Dependency::new(name, sums.sha1, sums.md5)),
            Err(err) => {
                warn!(
                    event = "producer.dependency_failed",
                    build = %id,
                    path = %path.display(),
                    error = %err,
                );
                collection.failed += 1;
            }
        }
    }

    collection.added = dependencies.len();
    if !dependencies.is_empty() {
        let record = with_module(PartialRecord::dependencies(dependencies), module);
        collection.path = Some(store.append_partial(id, &record)?);
    }
    info!(
        event = "producer.dependencies_collected",
        build = %id,
        added = collection.added,
        failed = collection.failed,
    );
    Ok(collection)
}

pub fn add_vcs(store: &dyn StagingStore, id: &BuildId, vcs: Vcs) -> Result<PathBuf> {
    stage(store, id, PartialRecord::vcs(vcs))
}

/// Stage the VCS coordinates of a git checkout.
///
/// With no `dot_git`, the `.git` directory is searched upward from the
/// current working directory.
pub fn add_git(store: &dyn StagingStore, id: &BuildId, dot_git: Option<&Path>) -> Result<Vcs> {
    let vcs = git::read_vcs(&locate_dot_git(dot_git)?)?;
    add_vcs(store, id, vcs.clone())?;
    Ok(vcs)
}

/// Like [`add_git`], also attaching the issues mentioned in commits after
/// `since` (or the last `log_limit` commits when `since` is absent).
pub fn add_git_with_issues(
    store: &dyn StagingStore,
    id: &BuildId,
    dot_git: Option<&Path>,
    config: &IssuesConfig,
    since: Option<&str>,
) -> Result<Vcs> {
    store.write_general_details_if_absent(id)?;
    let dot_git = locate_dot_git(dot_git)?;
    let issues = issues::collect_issues(&dot_git, config, since)?;
    let vcs = git::read_vcs(&dot_git)?.with_issues(issues);
    add_vcs(store, id, vcs.clone())?;
    Ok(vcs)
}

fn locate_dot_git(dot_git: Option<&Path>) -> Result<PathBuf> {
    match dot_git {
        Some(path) => Ok(path.to_path_buf()),
        None => {
            let cwd = std::env::current_dir().map_err(|e| StagingError::io(".", e))?;
            git::find_dot_git(&cwd)
        }
    }
}

/// `build.name=..;build.number=..;build.timestamp=..` for tagging uploads.
///
/// Falls back to name and number alone when the build was never
/// initialized.
pub fn build_properties(store: &dyn StagingStore, id: &BuildId) -> String {
    let base = format!("build.name={};build.number={}", id.name(), id.number());
    match store.read_general_details(id) {
        Ok(details) => format!("{base};build.timestamp={}", details.started_millis()),
        Err(err) => {
            warn!(event = "producer.details_unavailable", build = %id, error = %err);
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PartialPayload;
    use crate::staging::fs::FsStagingStore;

    fn setup() -> (tempfile::TempDir, FsStagingStore, BuildId) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStagingStore::new(dir.path()).unwrap();
        (dir, store, BuildId::new("app", "17").unwrap())
    }

    #[test]
    fn producers_initialize_the_build() {
        let (_dir, store, id) = setup();
        assert!(store.read_general_details(&id).is_err());

        add_artifacts(&store, &id, None, vec![StagedArtifact::new("a.jar", "s", "m")]).unwrap();
        let first = store.read_general_details(&id).unwrap();

        add_dependencies(&store, &id, None, vec![Dependency::new("lib:1", "s", "m")]).unwrap();
        assert_eq!(store.read_general_details(&id).unwrap(), first);
        assert_eq!(store.read_all_partials(&id).unwrap().len(), 2);
    }

    #[test]
    fn collect_env_prefixes_keys() {
        let (_dir, store, id) = setup();
        collect_env_from(
            &store,
            &id,
            vec![("PATH".to_string(), "/bin".to_string())],
        )
        .unwrap();

        let partials = store.read_all_partials(&id).unwrap();
        match &partials[0].payload {
            PartialPayload::Env(env) => {
                assert_eq!(env.get("buildInfo.env.PATH").map(String::as_str), Some("/bin"));
            }
            other => panic!("expected env partial, got {other:?}"),
        }
    }

    #[test]
    fn module_is_recorded_when_given() {
        let (_dir, store, id) = setup();
        add_artifacts(&store, &id, Some("web"), vec![]).unwrap();
        add_artifacts(&store, &id, Some(""), vec![]).unwrap();

        let mut modules: Vec<_> = store
            .read_all_partials(&id)
            .unwrap()
            .into_iter()
            .map(|p| p.module_id)
            .collect();
        modules.sort();
        assert_eq!(modules, vec!["".to_string(), "web".to_string()]);
    }

    #[test]
    fn build_properties_include_start_time() {
        let (_dir, store, id) = setup();
        assert_eq!(build_properties(&store, &id), "build.name=app;build.number=17");

        store.write_general_details_if_absent(&id).unwrap();
        let started = store.read_general_details(&id).unwrap().started_millis();
        assert_eq!(
            build_properties(&store, &id),
            format!("build.name=app;build.number=17;build.timestamp={started}")
        );
    }

    #[test]
    fn dependencies_from_paths_are_hashed() {
        let (dir, store, id) = setup();
        let libs = dir.path().join("libs");
        std::fs::create_dir_all(&libs).unwrap();
        std::fs::write(libs.join("hello.jar"), "hello").unwrap();
        std::fs::write(libs.join("notes.txt"), "skip me").unwrap();

        let pattern = format!("{}/*.jar", libs.display());
        let collected =
            add_dependencies_from_paths(&store, &id, Some("core"), &[pattern]).unwrap();
        assert_eq!((collected.added, collected.failed), (1, 0));
        assert!(collected.path.is_some());

        let partials = store.read_all_partials(&id).unwrap();
        assert_eq!(partials[0].module_id, "core");
        assert_eq!(
            partials[0].payload,
            PartialPayload::Dependencies(vec![Dependency::new(
                "hello.jar",
                "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d",
                "5d41402abc4b2a76b9719d911017c592",
            )])
        );
    }

    #[test]
    fn no_matching_files_stages_nothing_but_initializes() {
        let (dir, store, id) = setup();
        let pattern = format!("{}/missing/*.jar", dir.path().display());
        let collected = add_dependencies_from_paths(&store, &id, None, &[pattern]).unwrap();
        assert_eq!(collected, DependencyCollection::default());
        assert!(store.read_general_details(&id).is_ok());
        assert!(store.read_all_partials(&id).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_files_are_counted() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, store, id) = setup();
        let libs = dir.path().join("libs");
        std::fs::create_dir_all(&libs).unwrap();
        std::fs::write(libs.join("a.jar"), "a").unwrap();
        let locked = libs.join("b.jar");
        std::fs::write(&locked, "b").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        if std::fs::File::open(&locked).is_ok() {
            // Running as root: permissions are not enforced.
            return;
        }

        let pattern = format!("{}/*.jar", libs.display());
        let collected = add_dependencies_from_paths(&store, &id, None, &[pattern]).unwrap();
        assert_eq!((collected.added, collected.failed), (1, 1));
    }

    #[test]
    fn add_git_stages_vcs() {
        let (_dir, store, id) = setup();
        let repo = tempfile::tempdir().unwrap();
        let dot_git = repo.path().join(".git");
        std::fs::create_dir_all(&dot_git).unwrap();
        std::fs::write(dot_git.join("HEAD"), "abc123\n").unwrap();
        std::fs::write(
            dot_git.join("config"),
            "[remote \"origin\"]\n\turl = git@example.com:team/app.git\n",
        )
        .unwrap();

        let vcs = add_git(&store, &id, Some(&dot_git)).unwrap();
        assert_eq!(vcs.revision, "abc123");

        let partials = store.read_all_partials(&id).unwrap();
        assert_eq!(partials[0].payload, PartialPayload::Vcs(vcs));
    }

    #[test]
    fn add_git_with_issues_attaches_tracker_issues() {
        let (_dir, store, id) = setup();
        let repo = tempfile::tempdir().unwrap();
        let git = |args: &[&str]| {
            let output = std::process::Command::new("git")
                .args(args)
                .current_dir(repo.path())
                .output()
                .unwrap();
            assert!(output.status.success(), "git {args:?} failed");
        };
        git(&["init"]);
        git(&["config", "user.name", "test-user"]);
        git(&["config", "user.email", "test@example.com"]);
        git(&["remote", "add", "origin", "https://example.com/team/app.git"]);
        git(&["commit", "--allow-empty", "-m", "APP-7 ship it"]);

        let config = IssuesConfig::from_toml(
            "[issues]\ntracker_name = \"JIRA\"\nregexp = '^(\\w+-\\d+) (.+)$'\n\
             key_group_index = 1\nsummary_group_index = 2\n",
        )
        .unwrap();
        let dot_git = repo.path().join(".git");
        let vcs = add_git_with_issues(&store, &id, Some(&dot_git), &config, None).unwrap();

        assert_eq!(vcs.url, "https://example.com/team/app.git");
        let issues = vcs.issues.as_ref().unwrap();
        assert_eq!(issues.affected_issues[0].key, "APP-7");
        assert_eq!(issues.affected_issues[0].summary, "ship it");

        let partials = store.read_all_partials(&id).unwrap();
        assert_eq!(partials[0].payload, PartialPayload::Vcs(vcs));
    }
}
