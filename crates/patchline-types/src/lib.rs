//! Core domain types for patchline.
//!
//! This crate provides the types shared across the patchline workspace: release
//! lines, versions and their approval state, release files, ancestry edges,
//! persisted patch records, and the events recorded while assembling a patch.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use patchline_category::{Category, KnownSubCategory, SubCategory};
pub use patchline_version::VersionParts;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Store-assigned identifier of a [`Version`].
    VersionId
);
id_type!(
    /// Store-assigned identifier of a [`Customer`].
    CustomerId
);
id_type!(
    /// Store-assigned identifier of a [`ReleaseFile`].
    FileId
);
id_type!(
    /// Store-assigned identifier of a [`PatchRecord`].
    PatchId
);

/// Which release line a version belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseLine {
    /// Canonical product versions.
    Standard,
    /// A per-customer branch anchored to one standard version.
    Custom,
}

impl fmt::Display for ReleaseLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseLine::Standard => write!(f, "STANDARD"),
            ReleaseLine::Custom => write!(f, "CUSTOM"),
        }
    }
}

/// One (release line, customer) pair. Versions are unique and totally ordered
/// within a scope, and creation order is counted per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineScope {
    pub release_line: ReleaseLine,
    pub customer_id: Option<CustomerId>,
}

impl LineScope {
    pub fn standard() -> Self {
        Self {
            release_line: ReleaseLine::Standard,
            customer_id: None,
        }
    }

    pub fn custom(customer_id: CustomerId) -> Self {
        Self {
            release_line: ReleaseLine::Custom,
            customer_id: Some(customer_id),
        }
    }

    /// Stable string key, usable as a JSON object key.
    pub fn key(&self) -> String {
        match self.customer_id {
            Some(id) => format!("{}/{}", self.release_line, id),
            None => self.release_line.to_string(),
        }
    }
}

impl fmt::Display for LineScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A customer owning a custom release line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    /// Short code embedded in custom version strings (`1.3.0-{code}.1.0.0`).
    pub code: String,
    pub name: String,
    /// The standard version every custom version of this customer is anchored to.
    pub base_version_id: Option<VersionId>,
    pub created_at: DateTime<Utc>,
}

/// Who approved a version, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
}

/// A release version on a standard, custom or hotfix branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub release_line: ReleaseLine,
    pub customer_id: Option<CustomerId>,
    pub parts: VersionParts,
    /// Canonical display form, e.g. `1.3.0`, `1.3.0-ACME.1.0.0`, `1.3.0.2`.
    pub full_version: String,
    pub is_hotfix: bool,
    /// Mandatory for hotfixes; always a non-hotfix version.
    pub parent_version_id: Option<VersionId>,
    pub approval: Option<Approval>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub comment: Option<String>,
}

impl Version {
    pub fn scope(&self) -> LineScope {
        LineScope {
            release_line: self.release_line,
            customer_id: self.customer_id,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.approval.is_some()
    }

    pub fn approved_by(&self) -> Option<&str> {
        self.approval.as_ref().map(|a| a.approved_by.as_str())
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approval.as_ref().map(|a| a.approved_at)
    }
}

/// `ancestor` precedes `descendant` at creation-order `distance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AncestryEdge {
    pub ancestor: VersionId,
    pub descendant: VersionId,
    pub distance: u64,
}

/// A physical artifact belonging to one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFile {
    pub id: FileId,
    pub version_id: VersionId,
    pub category: Category,
    pub sub_category: Option<SubCategory>,
    pub file_name: String,
    /// Path relative to the storage root.
    pub storage_path: String,
    pub size: u64,
    /// Hex-encoded SHA-256 of the file contents.
    pub checksum: String,
    /// Unique within (version, sub-category); starts at 1.
    pub execution_order: u32,
    pub created_at: DateTime<Utc>,
}

/// A validated entry of an extracted upload, ready to be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntry {
    pub category: Category,
    pub sub_category: Option<SubCategory>,
    pub relative_path: String,
    pub bytes: Vec<u8>,
}

/// Durable record of one successful patch assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub id: PatchId,
    pub release_line: ReleaseLine,
    pub customer_id: Option<CustomerId>,
    pub from_version: String,
    pub to_version: String,
    pub from_version_id: VersionId,
    pub to_version_id: VersionId,
    pub patch_name: String,
    pub output_path: PathBuf,
    pub created_by: String,
    pub comment: Option<String>,
    pub assignee_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Stages of the patch assembly pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyStage {
    Resolving,
    DirectoryAllocated,
    FilesCopied,
    ScriptsGenerated,
    ManifestWritten,
    Persisted,
}

impl fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssemblyStage::Resolving => "resolving",
            AssemblyStage::DirectoryAllocated => "directory_allocated",
            AssemblyStage::FilesCopied => "files_copied",
            AssemblyStage::ScriptsGenerated => "scripts_generated",
            AssemblyStage::ManifestWritten => "manifest_written",
            AssemblyStage::Persisted => "persisted",
        };
        f.write_str(name)
    }
}

/// Something that happened to the catalog or during an assembly run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    VersionCreated {
        version: String,
    },
    VersionApproved {
        version: String,
        approved_by: String,
    },
    VersionDeleted {
        version: String,
    },
    HotfixCreated {
        parent: String,
        version: String,
    },
    FilesRegistered {
        version: String,
        count: usize,
    },
    AssemblyStarted {
        from: String,
        to: String,
    },
    RangeResolved {
        versions: Vec<String>,
    },
    StageCompleted {
        stage: AssemblyStage,
    },
    SourceFileMissing {
        version: String,
        storage_path: String,
    },
    ScriptGenerated {
        sub_category: String,
        path: PathBuf,
    },
    AssemblyFailed {
        stage: AssemblyStage,
        message: String,
    },
    RolledBack {
        path: PathBuf,
        clean: bool,
    },
    PatchPersisted {
        patch_id: PatchId,
    },
    PatchDeleted {
        patch_id: PatchId,
    },
}

/// A timestamped [`EventType`] about one subject (a version or patch name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event_type: EventType,
    pub subject: String,
}

impl CatalogEvent {
    pub fn now(subject: impl Into<String>, event_type: EventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            subject: subject.into(),
        }
    }
}
