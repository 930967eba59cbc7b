//! buildstage - CI build-info staging and publishing
//!
//! Each CI step stages what it knows about the build; a final `publish`
//! merges everything into one build-info document and sends it to the
//! artifact server.
//!
//! ## Commands
//!
//! - `add-artifacts` / `add-dependencies`: stage entities from a JSON file
//!   (`add-dependencies --pattern` hashes matching local files instead)
//! - `add-fragment`: stage a complete build-info document produced elsewhere
//! - `collect-env`: stage the current environment
//! - `add-git`: stage the revision and origin url of a git checkout, plus
//!   tracker issues from recent commits with `--issues-config`
//! - `build-properties`: print the properties string for tagging uploads
//! - `publish`: merge, tag, send and clean up
//! - `clean`: drop staged data without publishing

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

use buildstage_client::{ArtifactServerClient, ServerConfig};
use buildstage_core::{
    BuildId, BuildInfo, Dependency, FsStagingStore, IssuesConfig, PublishConfig, PublishOutcome,
    Publisher, StagedArtifact, StagingConfig, StagingStore,
};

#[derive(Parser)]
#[command(name = "buildstage")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Stage CI build information and publish it as one build-info document",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Staging base directory
    #[arg(long, global = true, env = "BUILDSTAGE_HOME")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct BuildArgs {
    /// Build name
    name: String,
    /// Build number
    number: String,
}

impl BuildArgs {
    fn id(&self) -> Result<BuildId> {
        BuildId::new(self.name.as_str(), self.number.as_str()).context("Invalid build identifier")
    }
}

#[derive(Args, Debug, Clone, Default)]
struct ServerArgs {
    /// Artifact server base URL
    #[arg(long, env = "BUILDSTAGE_URL")]
    url: Option<String>,

    /// Server user; also recorded as the publishing principal
    #[arg(long, env = "BUILDSTAGE_USER")]
    user: Option<String>,

    #[arg(long, env = "BUILDSTAGE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Bearer token, used instead of user/password when set
    #[arg(long, env = "BUILDSTAGE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, env = "BUILDSTAGE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
}

impl ServerArgs {
    fn to_config(&self) -> ServerConfig {
        let mut config = ServerConfig::from_env();
        if let Some(url) = &self.url {
            config = config.with_url(url);
        }
        if let Some(user) = &self.user {
            config = config.with_basic_auth(user, self.password.as_deref().unwrap_or(""));
        }
        if let Some(token) = &self.access_token {
            config = config.with_access_token(token);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Stage artifacts read from a JSON array file
    AddArtifacts {
        #[command(flatten)]
        build: BuildArgs,

        /// JSON file holding `[{"name", "sha1", "md5", "path"?}]`
        #[arg(short, long)]
        file: PathBuf,

        /// Target module (default: the build name)
        #[arg(short, long)]
        module: Option<String>,
    },

    /// Stage dependencies read from a JSON array file or hashed from local files
    AddDependencies {
        #[command(flatten)]
        build: BuildArgs,

        /// JSON file holding `[{"id", "sha1", "md5", "scopes"?}]`
        #[arg(short, long, required_unless_present = "pattern")]
        file: Option<PathBuf>,

        /// Glob of local files to hash and stage (repeatable)
        #[arg(short, long, conflicts_with = "file")]
        pattern: Vec<String>,

        /// Target module (default: the build name)
        #[arg(short, long)]
        module: Option<String>,
    },

    /// Stage a complete build-info document produced by other tooling
    AddFragment {
        #[command(flatten)]
        build: BuildArgs,

        /// Build-info JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Stage the current process environment
    CollectEnv {
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Stage the revision and origin url of a git checkout
    AddGit {
        #[command(flatten)]
        build: BuildArgs,

        /// Path to the `.git` directory (default: searched upward from cwd)
        dot_git: Option<PathBuf>,

        /// TOML file with an `[issues]` table; enables issue collection
        #[arg(long)]
        issues_config: Option<PathBuf>,

        /// Read commits after this revision (default: the revision of the
        /// latest published build, when a server is configured)
        #[arg(long, requires = "issues_config")]
        since: Option<String>,

        #[command(flatten)]
        server: ServerArgs,
    },

    /// Print `build.name=..;build.number=..;build.timestamp=..`
    BuildProperties {
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Merge staged data and publish it
    Publish {
        #[command(flatten)]
        build: BuildArgs,

        /// Print the merged document instead of sending it
        #[arg(long)]
        dry_run: bool,

        /// `;`-separated patterns of env keys to keep
        #[arg(long, env = "BUILDSTAGE_ENV_INCLUDE")]
        env_include: Option<String>,

        /// `;`-separated patterns of env keys to drop
        #[arg(long, env = "BUILDSTAGE_ENV_EXCLUDE")]
        env_exclude: Option<String>,

        /// CI job URL recorded in the document
        #[arg(long, env = "BUILDSTAGE_BUILD_URL")]
        build_url: Option<String>,

        #[command(flatten)]
        server: ServerArgs,
    },

    /// Remove staged data without publishing
    Clean {
        #[command(flatten)]
        build: BuildArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    buildstage_core::init_tracing(cli.json, level);

    let staging = match &cli.home {
        Some(home) => StagingConfig::new(home),
        None => StagingConfig::from_env(),
    };
    let store = FsStagingStore::from_config(&staging).with_context(|| {
        format!(
            "Failed to open staging directory {}",
            staging.base_dir.display()
        )
    })?;

    match cli.command {
        Commands::AddArtifacts {
            build,
            file,
            module,
        } => cmd_add_artifacts(&store, &build.id()?, &file, module.as_deref()),
        Commands::AddDependencies {
            build,
            file,
            pattern,
            module,
        } => match file {
            Some(file) => cmd_add_dependencies(&store, &build.id()?, &file, module.as_deref()),
            None => {
                cmd_add_dependencies_from_paths(&store, &build.id()?, &pattern, module.as_deref())
            }
        },
        Commands::AddFragment { build, file } => cmd_add_fragment(&store, &build.id()?, &file),
        Commands::CollectEnv { build } => cmd_collect_env(&store, &build.id()?),
        Commands::AddGit {
            build,
            dot_git,
            issues_config,
            since,
            server,
        } => {
            let id = build.id()?;
            match issues_config {
                Some(config) => {
                    let options = IssueOptions {
                        config: &config,
                        since: since.as_deref(),
                        server: &server,
                    };
                    cmd_add_git_with_issues(&store, &id, dot_git.as_deref(), options).await
                }
                None => cmd_add_git(&store, &id, dot_git.as_deref()),
            }
        }
        Commands::BuildProperties { build } => {
            println!("{}", buildstage_core::build_properties(&store, &build.id()?));
            Ok(())
        }
        Commands::Publish {
            build,
            dry_run,
            env_include,
            env_exclude,
            build_url,
            server,
        } => {
            let mut config = PublishConfig::from_env().with_dry_run(dry_run);
            if let Some(patterns) = &env_include {
                config = config.with_env_include(patterns);
            }
            if let Some(patterns) = &env_exclude {
                config = config.with_env_exclude(patterns);
            }
            if let Some(url) = &build_url {
                config = config.with_build_url(url);
            }
            cmd_publish(Arc::new(store), &build.id()?, config, &server).await
        }
        Commands::Clean { build } => cmd_clean(&store, &build.id()?),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn cmd_add_artifacts(
    store: &FsStagingStore,
    id: &BuildId,
    file: &Path,
    module: Option<&str>,
) -> Result<()> {
    let artifacts: Vec<StagedArtifact> = read_json(file)?;
    let count = artifacts.len();
    let path = buildstage_core::add_artifacts(store, id, module, artifacts)
        .context("Failed to stage artifacts")?;
    info!(build = %id, count, path = %path.display(), "artifacts staged");
    Ok(())
}

fn cmd_add_dependencies(
    store: &FsStagingStore,
    id: &BuildId,
    file: &Path,
    module: Option<&str>,
) -> Result<()> {
    let dependencies: Vec<Dependency> = read_json(file)?;
    let count = dependencies.len();
    let path = buildstage_core::add_dependencies(store, id, module, dependencies)
        .context("Failed to stage dependencies")?;
    info!(build = %id, count, path = %path.display(), "dependencies staged");
    Ok(())
}

fn cmd_add_dependencies_from_paths(
    store: &FsStagingStore,
    id: &BuildId,
    patterns: &[String],
    module: Option<&str>,
) -> Result<()> {
    let collected = buildstage_core::add_dependencies_from_paths(store, id, module, patterns)
        .context("Failed to stage dependencies")?;
    println!(
        "✓ Staged {} dependencies ({} failed)",
        collected.added, collected.failed
    );
    if collected.failed > 0 {
        anyhow::bail!(
            "{} of {} files could not be hashed",
            collected.failed,
            collected.added + collected.failed
        );
    }
    Ok(())
}

fn cmd_add_fragment(store: &FsStagingStore, id: &BuildId, file: &Path) -> Result<()> {
    let fragment: BuildInfo = read_json(file)?;
    store
        .write_general_details_if_absent(id)
        .context("Failed to initialize build")?;
    let path = store
        .save_generated_build_info(id, &fragment)
        .context("Failed to stage build-info fragment")?;
    info!(build = %id, modules = fragment.modules.len(), path = %path.display(), "fragment staged");
    Ok(())
}

fn cmd_collect_env(store: &FsStagingStore, id: &BuildId) -> Result<()> {
    buildstage_core::collect_env(store, id).context("Failed to stage environment")?;
    info!(build = %id, "environment staged");
    Ok(())
}

fn cmd_add_git(store: &FsStagingStore, id: &BuildId, dot_git: Option<&Path>) -> Result<()> {
    let vcs = buildstage_core::add_git(store, id, dot_git).context("Failed to stage git info")?;
    info!(build = %id, revision = %vcs.revision, url = %vcs.url, "git info staged");
    Ok(())
}

struct IssueOptions<'a> {
    config: &'a Path,
    since: Option<&'a str>,
    server: &'a ServerArgs,
}

async fn cmd_add_git_with_issues(
    store: &FsStagingStore,
    id: &BuildId,
    dot_git: Option<&Path>,
    options: IssueOptions<'_>,
) -> Result<()> {
    let config = IssuesConfig::load(options.config).with_context(|| {
        format!("Failed to read issues config {}", options.config.display())
    })?;

    let since = match options.since {
        Some(rev) => Some(rev.to_string()),
        None => {
            let server_config = options.server.to_config();
            if server_config.url.trim().is_empty() {
                None
            } else {
                ArtifactServerClient::new(server_config)
                    .context("Failed to create server client")?
                    .latest_vcs_revision(id.name())
                    .await
                    .context("Failed to look up the latest published build")?
            }
        }
    };

    let vcs = buildstage_core::add_git_with_issues(store, id, dot_git, &config, since.as_deref())
        .context("Failed to stage git info")?;
    let found = vcs.issues.as_ref().map_or(0, |i| i.affected_issues.len());
    info!(
        build = %id,
        revision = %vcs.revision,
        since = since.as_deref().unwrap_or(""),
        issues = found,
        "git info staged"
    );
    Ok(())
}

async fn cmd_publish(
    store: Arc<FsStagingStore>,
    id: &BuildId,
    mut config: PublishConfig,
    server: &ServerArgs,
) -> Result<()> {
    let server_config = server.to_config();
    if let Some(user) = &server_config.user {
        config = config.with_principal(user);
    }

    if config.dry_run {
        let assembled = buildstage_core::publish::assemble(store.as_ref(), &config, id)
            .with_context(|| format!("Failed to assemble build {id}"))?;
        println!("{}", serde_json::to_string_pretty(&assembled.build_info)?);
        return Ok(());
    }

    let client = Arc::new(
        ArtifactServerClient::new(server_config).context("Failed to create server client")?,
    );
    let outcome = Publisher::new(store, client.clone(), config)
        .with_tagger(client)
        .publish(id)
        .await;

    match outcome.with_context(|| format!("Failed to publish build {id}"))? {
        PublishOutcome::DryRun { document } => println!("{document}"),
        PublishOutcome::Published { modules, tagging } => {
            println!("✓ Published build {id}");
            println!("  Modules: {modules}");
            if tagging.tagged + tagging.failed > 0 {
                println!(
                    "  Tagged artifacts: {} ({} failed)",
                    tagging.tagged, tagging.failed
                );
            }
        }
    }
    Ok(())
}

fn cmd_clean(store: &FsStagingStore, id: &BuildId) -> Result<()> {
    store
        .purge(id)
        .with_context(|| format!("Failed to clean build {id}"))?;
    println!("✓ Cleaned staged data for {id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, FsStagingStore, BuildId) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStagingStore::new(dir.path()).unwrap();
        (dir, store, BuildId::new("cli-build", "9").unwrap())
    }

    #[test]
    fn parses_publish_flags() {
        let cli = Cli::try_parse_from([
            "buildstage",
            "--verbose",
            "publish",
            "app",
            "12",
            "--dry-run",
            "--env-exclude",
            "*secret*",
            "--url",
            "https://artifacts.example.com",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Publish {
                build,
                dry_run,
                env_exclude,
                server,
                ..
            } => {
                assert_eq!((build.name.as_str(), build.number.as_str()), ("app", "12"));
                assert!(dry_run);
                assert_eq!(env_exclude.as_deref(), Some("*secret*"));
                assert_eq!(server.url.as_deref(), Some("https://artifacts.example.com"));
            }
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn add_artifacts_requires_file() {
        assert!(Cli::try_parse_from(["buildstage", "add-artifacts", "app", "1"]).is_err());
    }

    #[test]
    fn add_dependencies_takes_file_or_patterns() {
        let base = ["buildstage", "add-dependencies", "app", "1"];
        assert!(Cli::try_parse_from(base).is_err());

        let with_both = [&base[..], &["--file", "d.json", "--pattern", "*.jar"]].concat();
        assert!(Cli::try_parse_from(with_both).is_err());

        let patterns = [&base[..], &["-p", "libs/*.jar", "-p", "lib/**/*.so"]].concat();
        match Cli::try_parse_from(patterns).unwrap().command {
            Commands::AddDependencies { file, pattern, .. } => {
                assert!(file.is_none());
                assert_eq!(pattern, vec!["libs/*.jar", "lib/**/*.so"]);
            }
            _ => panic!("expected add-dependencies"),
        }
    }

    #[test]
    fn since_requires_issues_config() {
        let args = ["buildstage", "add-git", "app", "1", "--since", "abc"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn dependency_patterns_are_hashed() {
        let (dir, store, id) = setup();
        std::fs::write(dir.path().join("hello.jar"), "hello").unwrap();

        let patterns = vec![format!("{}/*.jar", dir.path().display())];
        cmd_add_dependencies_from_paths(&store, &id, &patterns, None).unwrap();

        let partials = store.read_all_partials(&id).unwrap();
        assert_eq!(
            partials[0].payload,
            buildstage_core::PartialPayload::Dependencies(vec![Dependency::new(
                "hello.jar",
                "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d",
                "5d41402abc4b2a76b9719d911017c592",
            )])
        );
    }

    #[test]
    fn blank_build_name_is_rejected() {
        let build = BuildArgs {
            name: " ".into(),
            number: "1".into(),
        };
        assert!(build.id().is_err());
    }

    #[test]
    fn add_artifacts_reads_json_file() {
        let (dir, store, id) = setup();
        let file = dir.path().join("artifacts.json");
        std::fs::write(
            &file,
            r#"[{"name":"a.jar","sha1":"s1","md5":"m1","path":"libs/a.jar"}]"#,
        )
        .unwrap();

        cmd_add_artifacts(&store, &id, &file, Some("core")).unwrap();
        let partials = store.read_all_partials(&id).unwrap();
        assert_eq!(partials.len(), 1);
        assert_eq!(partials[0].module_id, "core");
    }

    #[test]
    fn malformed_input_file_is_reported() {
        let (dir, store, id) = setup();
        let file = dir.path().join("deps.json");
        std::fs::write(&file, "not json").unwrap();

        let err = cmd_add_dependencies(&store, &id, &file, None).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
        assert!(store.read_all_partials(&id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn dry_run_publish_keeps_staging() {
        let (_dir, store, id) = setup();
        buildstage_core::add_artifacts(
            &store,
            &id,
            None,
            vec![StagedArtifact::new("a.jar", "s1", "m1")],
        )
        .unwrap();
        let store = Arc::new(store);

        let config = PublishConfig::from_env()
            .with_env_include("*")
            .with_env_exclude("")
            .with_dry_run(true);
        cmd_publish(store.clone(), &id, config, &ServerArgs::default())
            .await
            .unwrap();
        assert_eq!(store.read_all_partials(&id).unwrap().len(), 1);
    }

    #[test]
    fn clean_removes_staged_build() {
        let (_dir, store, id) = setup();
        store.write_general_details_if_absent(&id).unwrap();
        cmd_clean(&store, &id).unwrap();
        assert!(!store.build_path(&id).exists());
    }
}
