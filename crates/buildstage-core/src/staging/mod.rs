pub mod fs;

use std::path::PathBuf;

use crate::error::Result;
use crate::identifier::BuildId;
use crate::model::{BuildInfo, GeneralDetails, PartialRecord};

/// Per-build holding area for partial records awaiting publish.
///
/// Shared across process boundaries: every producer invocation is its own
/// process. Implementations must never overwrite an existing partial.
pub trait StagingStore: Send + Sync {
    /// Directory for `id`, created (with parents) if missing.
    fn resolve(&self, id: &BuildId) -> Result<PathBuf>;

    /// Record the build start time unless a previous producer already did.
    /// Returns `true` when this call wrote the record.
    fn write_general_details_if_absent(&self, id: &BuildId) -> Result<bool>;

    /// Fails with `UninitializedBuild` when no details were ever written.
    fn read_general_details(&self, id: &BuildId) -> Result<GeneralDetails>;

    /// Store `record` under a fresh unique name and return its path.
    fn append_partial(&self, id: &BuildId, record: &PartialRecord) -> Result<PathBuf>;

    /// All readable partials, in file-enumeration order. Corrupt files are
    /// logged and skipped.
    fn read_all_partials(&self, id: &BuildId) -> Result<Vec<PartialRecord>>;

    /// Stage a complete build-info fragment produced by external tooling.
    fn save_generated_build_info(&self, id: &BuildId, fragment: &BuildInfo) -> Result<PathBuf>;

    fn read_generated_build_infos(&self, id: &BuildId) -> Result<Vec<BuildInfo>>;

    /// Remove everything staged for `id`.
    fn purge(&self, id: &BuildId) -> Result<()>;
}
