//! Typed errors for catalog, lineage, range and assembly operations.

use std::io;
use std::path::PathBuf;

use patchline_category::CategoryError;
use patchline_storage::StorageError;
use patchline_store::StoreError;
use patchline_types::{AssemblyStage, PatchId, VersionId};
use patchline_version::ParseError;
use thiserror::Error;

fn join(items: &[String]) -> String {
    items.join(", ")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineageError {
    #[error("version id {0} is not in the catalog")]
    UnknownVersion(VersionId),

    #[error("hotfix `{0}` has no parent version")]
    MissingParent(String),
}

/// Why a cumulative range could not be resolved.
#[derive(Debug, Error)]
pub enum RangeError {
    #[error("unknown version `{0}`")]
    UnknownVersion(String),

    #[error("unknown customer `{0}`")]
    UnknownCustomer(String),

    #[error("range endpoints do not share a release line: {reason}")]
    ScopeMismatch { reason: String },

    #[error("`{from}` must precede `{to}`")]
    InvalidOrder { from: String, to: String },

    #[error("range contains unapproved versions: {}", join(.versions))]
    UnapprovedVersionsInRange { versions: Vec<String> },

    #[error("no versions between `{from}` and `{to}`")]
    NoVersionsInRange { from: String, to: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum HotfixError {
    #[error("unknown version `{0}`")]
    UnknownVersion(String),

    #[error("`{parent}` is itself a hotfix; hotfixes cannot be nested")]
    ParentIsHotfix { parent: String },

    #[error("`{0}` is not a hotfix")]
    NotAHotfix(String),

    #[error(transparent)]
    Lineage(#[from] LineageError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures of registry, file and patch-record operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Category(#[from] CategoryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Hotfix(#[from] HotfixError),

    #[error(transparent)]
    Lineage(#[from] LineageError),

    #[error("unknown version `{0}`")]
    UnknownVersion(String),

    #[error("unknown customer `{0}`")]
    UnknownCustomer(String),

    #[error("unknown patch {0}")]
    UnknownPatch(PatchId),

    #[error("invalid customer code `{0}`: use letters, digits and `_`")]
    InvalidCustomerCode(String),

    #[error("customer `{0}` already exists")]
    DuplicateCustomer(String),

    #[error("customer `{0}` has no base version; set one first")]
    CustomerHasNoBase(String),

    #[error("`{version}` cannot be used here: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("version `{version}` already exists in {scope}")]
    DuplicateVersion { version: String, scope: String },

    #[error("version `{version}` was already approved by {approved_by}")]
    AlreadyApproved { version: String, approved_by: String },

    #[error("version `{version}` still has hotfixes: {}", join(.hotfixes))]
    HasHotfixes {
        version: String,
        hotfixes: Vec<String>,
    },

    #[error("version `{version}` is an endpoint of patches: {}", join(.patches))]
    ReferencedByPatches {
        version: String,
        patches: Vec<String>,
    },

    #[error("invalid file name `{0}`")]
    InvalidFileName(String),

    #[error("`{file_name}` is already registered for {version} ({category})")]
    DuplicateFile {
        version: String,
        category: String,
        file_name: String,
    },

    #[error("sub-category `{given}` differs from `{existing}` only by case; use `{existing}`")]
    SubCategorySpelling { given: String, existing: String },

    #[error("invalid upload entry {path}")]
    Upload {
        path: String,
        #[source]
        source: CategoryError,
    },

    #[error("I/O failed at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One file that could not be copied into a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFailure {
    pub storage_path: String,
    pub message: String,
}

/// Failures of a patch assembly run. Everything after directory allocation
/// has already been rolled back when one of these is returned.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("failed to read catalog")]
    Store(#[source] StoreError),

    #[error("invalid patch name `{0}`")]
    InvalidPatchName(String),

    #[error("output directory {} already exists and is not empty", .path.display())]
    DirectoryCollision { path: PathBuf },

    #[error("I/O failed during {stage} at {}", .path.display())]
    Io {
        stage: AssemblyStage,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy {} file(s): {}", .failures.len(), describe_failures(.failures))]
    CopyFailed { failures: Vec<CopyFailure> },

    #[error("assembly cancelled during {stage}")]
    Cancelled { stage: AssemblyStage },

    #[error("assembly timed out during {stage}")]
    TimedOut { stage: AssemblyStage },

    #[error("failed to persist patch record")]
    PersistFailure(#[source] StoreError),
}

fn describe_failures(failures: &[CopyFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.storage_path, f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl AssemblyError {
    /// Pipeline stage the run was working towards when it failed.
    pub fn stage(&self) -> AssemblyStage {
        match self {
            AssemblyError::Range(_) | AssemblyError::Store(_) => AssemblyStage::Resolving,
            AssemblyError::InvalidPatchName(_) | AssemblyError::DirectoryCollision { .. } => {
                AssemblyStage::DirectoryAllocated
            }
            AssemblyError::CopyFailed { .. } => AssemblyStage::FilesCopied,
            AssemblyError::Io { stage, .. }
            | AssemblyError::Cancelled { stage }
            | AssemblyError::TimedOut { stage } => *stage,
            AssemblyError::PersistFailure(_) => AssemblyStage::Persisted,
        }
    }
}
