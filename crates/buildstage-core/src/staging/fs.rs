use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::StagingStore;
use crate::config::StagingConfig;
use crate::error::{Result, StagingError};
use crate::identifier::BuildId;
use crate::model::{BuildInfo, GeneralDetails, PartialRecord};
use crate::obs;

/// Subdirectory holding partials and the general-details record.
pub const PARTIALS_DIR: &str = "partials";

/// Fixed name of the general-details record inside [`PARTIALS_DIR`].
pub const GENERAL_DETAILS_FILE: &str = "details";

const PARTIAL_PREFIX: &str = "partial-";
const FRAGMENT_PREFIX: &str = "fragment-";
/// Files still being written. Readers ignore dot-files.
const IN_FLIGHT_PREFIX: &str = ".staging-";

/// Filesystem-backed staging store.
///
/// Layout:
///
/// ```text
/// <root>/<build token>/fragment-<uuid>.json
/// <root>/<build token>/partials/details
/// <root>/<build token>/partials/partial-<uuid>.json
/// ```
///
/// Every file is written to a dot-prefixed temp file first and then linked
/// into place without clobbering, so readers never see half-written records
/// and concurrent producers never overwrite each other.
#[derive(Debug, Clone)]
pub struct FsStagingStore {
    root: PathBuf,
}

impl FsStagingStore {
    /// Create a store rooted at `root`. Creates `root` if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| StagingError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn from_config(config: &StagingConfig) -> Result<Self> {
        Self::new(&config.base_dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build directory path without touching the filesystem.
    pub fn build_path(&self, id: &BuildId) -> PathBuf {
        self.root.join(id.dir_token())
    }

    fn partials_path(&self, id: &BuildId) -> PathBuf {
        self.build_path(id).join(PARTIALS_DIR)
    }

    fn ensure_partials_dir(&self, id: &BuildId) -> Result<PathBuf> {
        let dir = self.partials_path(id);
        fs::create_dir_all(&dir).map_err(|e| StagingError::io(&dir, e))?;
        Ok(dir)
    }

    /// Serialize `value` into a temp file inside `dir`.
    fn write_temp<T: Serialize>(dir: &Path, value: &T) -> Result<tempfile::NamedTempFile> {
        let content = serde_json::to_vec_pretty(value)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(IN_FLIGHT_PREFIX)
            .tempfile_in(dir)
            .map_err(|e| StagingError::io(dir, e))?;
        tmp.write_all(&content)
            .map_err(|e| StagingError::io(tmp.path(), e))?;
        Ok(tmp)
    }

    /// Write `value` under a fresh `<prefix><uuid>.json` name in `dir`.
    fn write_unique<T: Serialize>(dir: &Path, prefix: &str, value: &T) -> Result<PathBuf> {
        let tmp = Self::write_temp(dir, value)?;
        let target = dir.join(format!("{prefix}{}.json", Uuid::new_v4().simple()));
        tmp.persist_noclobber(&target)
            .map_err(|e| StagingError::io(&target, e.error))?;
        Ok(target)
    }

    /// Regular, settled files in `dir` whose name starts with `prefix`,
    /// sorted by name. A missing directory yields nothing.
    fn list_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StagingError::io(dir, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StagingError::io(dir, e))?;
            let file_type = entry.file_type().map_err(|e| StagingError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || !name.starts_with(prefix) {
                continue;
            }
            files.push(entry.path());
        }
        files.sort();
        Ok(files)
    }

    /// Parse every file, skipping the ones that fail to parse.
    fn read_skipping_corrupt<T: DeserializeOwned>(
        id: &BuildId,
        files: Vec<PathBuf>,
    ) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(files.len());
        for path in files {
            let content = fs::read(&path).map_err(|e| StagingError::io(&path, e))?;
            match serde_json::from_slice::<T>(&content) {
                Ok(value) => out.push(value),
                Err(source) => {
                    let err = StagingError::CorruptPartial { path, source };
                    obs::emit_partial_skipped(id, &err);
                }
            }
        }
        Ok(out)
    }
}

impl StagingStore for FsStagingStore {
    fn resolve(&self, id: &BuildId) -> Result<PathBuf> {
        let dir = self.build_path(id);
        fs::create_dir_all(&dir).map_err(|e| StagingError::io(&dir, e))?;
        Ok(dir)
    }

    fn write_general_details_if_absent(&self, id: &BuildId) -> Result<bool> {
        let dir = self.ensure_partials_dir(id)?;
        let path = dir.join(GENERAL_DETAILS_FILE);
        if path.exists() {
            return Ok(false);
        }

        let details = GeneralDetails::now();
        let tmp = Self::write_temp(&dir, &details)?;
        // Exclusive link: a concurrent producer that got here first wins.
        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                obs::emit_general_details_written(id, &details.started_formatted());
                Ok(true)
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StagingError::io(&path, e.error)),
        }
    }

    fn read_general_details(&self, id: &BuildId) -> Result<GeneralDetails> {
        let path = self.partials_path(id).join(GENERAL_DETAILS_FILE);
        let content = fs::read(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StagingError::UninitializedBuild {
                    name: id.name().to_string(),
                    number: id.number().to_string(),
                }
            } else {
                StagingError::io(&path, e)
            }
        })?;
        Ok(serde_json::from_slice(&content)?)
    }

    fn append_partial(&self, id: &BuildId, record: &PartialRecord) -> Result<PathBuf> {
        let dir = self.ensure_partials_dir(id)?;
        let path = Self::write_unique(&dir, PARTIAL_PREFIX, record)?;
        obs::emit_partial_appended(id, record.payload.kind(), &path);
        Ok(path)
    }

    fn read_all_partials(&self, id: &BuildId) -> Result<Vec<PartialRecord>> {
        let files = Self::list_files(&self.partials_path(id), PARTIAL_PREFIX)?;
        Self::read_skipping_corrupt(id, files)
    }

    fn save_generated_build_info(&self, id: &BuildId, fragment: &BuildInfo) -> Result<PathBuf> {
        let dir = self.resolve(id)?;
        Self::write_unique(&dir, FRAGMENT_PREFIX, fragment)
    }

    fn read_generated_build_infos(&self, id: &BuildId) -> Result<Vec<BuildInfo>> {
        let files = Self::list_files(&self.build_path(id), FRAGMENT_PREFIX)?;
        Self::read_skipping_corrupt(id, files)
    }

    fn purge(&self, id: &BuildId) -> Result<()> {
        let dir = self.build_path(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                obs::emit_staging_purged(id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StagingError::io(&dir, e)),
        }
    }
}
