//! Catalog persistence for patchline.
//!
//! The whole catalog (customers, versions, release files, ancestry edges, patch
//! records and counters) is one JSON document. Writers take a [`Catalog`]
//! snapshot, mutate it and [`CatalogStore::commit`] it back; the commit only
//! succeeds if nobody else committed in between (revision compare-and-swap).
//!
//! # Example
//!
//! ```
//! use patchline_store::{CatalogStore, MemoryStore, transact};
//!
//! let store = MemoryStore::default();
//! let id = transact(&store, 3, |catalog| {
//!     Ok::<_, patchline_store::StoreError>(catalog.allocate_id())
//! })
//! .expect("transact");
//! assert_eq!(id, 1);
//! assert_eq!(store.snapshot().expect("snapshot").revision, 1);
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use patchline_types::{
    AncestryEdge, Customer, CustomerId, FileId, LineScope, PatchId, PatchRecord, ReleaseFile,
    SubCategory, Version, VersionId,
};

/// Schema tag written into every catalog document.
pub const CATALOG_SCHEMA: &str = "patchline.catalog.v1";

/// File name of the catalog inside the state directory.
pub const CATALOG_FILE: &str = "catalog.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("catalog I/O failed at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize catalog")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to parse catalog at {path}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported catalog schema `{found}` (expected `{CATALOG_SCHEMA}`)")]
    UnsupportedSchema { found: String },

    #[error("catalog changed concurrently: expected revision {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("catalog write rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

fn default_schema() -> String {
    CATALOG_SCHEMA.to_string()
}

/// The complete persisted state of a patchline workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Incremented by every successful commit.
    #[serde(default)]
    pub revision: u64,
    /// Last id handed out by [`Catalog::allocate_id`]; shared by every entity kind.
    #[serde(default)]
    pub next_id: u64,
    #[serde(default)]
    pub customers: BTreeMap<CustomerId, Customer>,
    #[serde(default)]
    pub versions: BTreeMap<VersionId, Version>,
    #[serde(default)]
    pub files: BTreeMap<FileId, ReleaseFile>,
    #[serde(default)]
    pub edges: Vec<AncestryEdge>,
    #[serde(default)]
    pub patches: BTreeMap<PatchId, PatchRecord>,
    /// Number of non-hotfix versions ever created per [`LineScope::key`].
    #[serde(default)]
    pub line_counters: BTreeMap<String, u64>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            revision: 0,
            next_id: 0,
            customers: BTreeMap::new(),
            versions: BTreeMap::new(),
            files: BTreeMap::new(),
            edges: Vec::new(),
            patches: BTreeMap::new(),
            line_counters: BTreeMap::new(),
        }
    }
}

impl Catalog {
    pub fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn version(&self, id: VersionId) -> Option<&Version> {
        self.versions.get(&id)
    }

    /// Look a version up by its full version string. Full strings are unique
    /// across lines because custom strings carry the customer code.
    pub fn version_by_name(&self, full_version: &str) -> Option<&Version> {
        self.versions
            .values()
            .find(|v| v.full_version == full_version)
    }

    pub fn customer(&self, id: CustomerId) -> Option<&Customer> {
        self.customers.get(&id)
    }

    pub fn customer_by_code(&self, code: &str) -> Option<&Customer> {
        self.customers.values().find(|c| c.code == code)
    }

    /// Every version (hotfixes included) in `scope`, in id order.
    pub fn versions_in_scope(&self, scope: LineScope) -> impl Iterator<Item = &Version> {
        self.versions.values().filter(move |v| v.scope() == scope)
    }

    pub fn hotfix_children(&self, parent: VersionId) -> impl Iterator<Item = &Version> {
        self.versions
            .values()
            .filter(move |v| v.is_hotfix && v.parent_version_id == Some(parent))
    }

    /// Files of one version ordered by sub-category then execution order.
    pub fn files_of(&self, version: VersionId) -> Vec<&ReleaseFile> {
        let mut files: Vec<&ReleaseFile> = self
            .files
            .values()
            .filter(|f| f.version_id == version)
            .collect();
        files.sort_by(|a, b| {
            let sub_a = a.sub_category.as_ref().map(SubCategory::as_str);
            let sub_b = b.sub_category.as_ref().map(SubCategory::as_str);
            sub_a
                .cmp(&sub_b)
                .then(a.execution_order.cmp(&b.execution_order))
                .then(a.id.cmp(&b.id))
        });
        files
    }

    /// Highest execution order already used in (version, sub-category).
    pub fn max_execution_order(
        &self,
        version: VersionId,
        sub_category: Option<&SubCategory>,
    ) -> u32 {
        self.files
            .values()
            .filter(|f| f.version_id == version && f.sub_category.as_ref() == sub_category)
            .map(|f| f.execution_order)
            .max()
            .unwrap_or(0)
    }

    pub fn edges_to(&self, descendant: VersionId) -> impl Iterator<Item = &AncestryEdge> {
        self.edges.iter().filter(move |e| e.descendant == descendant)
    }

    pub fn edges_from(&self, ancestor: VersionId) -> impl Iterator<Item = &AncestryEdge> {
        self.edges.iter().filter(move |e| e.ancestor == ancestor)
    }

    /// Patch records that use `version` as `from` or `to`.
    pub fn patches_referencing(&self, version: VersionId) -> impl Iterator<Item = &PatchRecord> {
        self.patches
            .values()
            .filter(move |p| p.from_version_id == version || p.to_version_id == version)
    }

    pub fn line_counter(&self, scope: LineScope) -> u64 {
        self.line_counters.get(&scope.key()).copied().unwrap_or(0)
    }

    /// Advance the creation counter of `scope` and return the new rank.
    pub fn advance_line_counter(&mut self, scope: LineScope) -> u64 {
        let counter = self.line_counters.entry(scope.key()).or_insert(0);
        *counter += 1;
        *counter
    }
}

/// Backend holding the catalog document.
pub trait CatalogStore: Send + Sync {
    /// A consistent copy of the current catalog.
    fn snapshot(&self) -> Result<Catalog, StoreError>;

    /// Persist `catalog` if its `revision` still matches the stored one.
    /// Returns the new revision.
    fn commit(&self, catalog: &Catalog) -> Result<u64, StoreError>;

    /// Human-readable description of where the catalog lives.
    fn location(&self) -> String;
}

/// Run `f` against a fresh snapshot and commit the result, retrying up to
/// `max_attempts` times when another writer committed first.
pub fn transact<S, T, E, F>(store: &S, max_attempts: u32, mut f: F) -> Result<T, E>
where
    S: CatalogStore + ?Sized,
    E: From<StoreError>,
    F: FnMut(&mut Catalog) -> Result<T, E>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let mut catalog = store.snapshot()?;
        let value = f(&mut catalog)?;
        match store.commit(&catalog) {
            Ok(_) => return Ok(value),
            Err(err) if err.is_conflict() && attempt < max_attempts => attempt += 1,
            Err(err) => return Err(err.into()),
        }
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn check_revision(expected: u64, actual: u64) -> Result<(), StoreError> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::Conflict { expected, actual })
    }
}

/// Catalog stored as `catalog.json` in a state directory.
#[derive(Debug)]
pub struct JsonFileStore {
    state_dir: PathBuf,
    write_guard: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            state_dir,
            write_guard: Mutex::new(()),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.state_dir.join(CATALOG_FILE)
    }

    fn load(&self) -> Result<Catalog, StoreError> {
        let path = self.catalog_path();
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Catalog::default()),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let catalog: Catalog = serde_json::from_slice(&content)
            .map_err(|source| StoreError::Deserialize {
                path: path.clone(),
                source,
            })?;
        if catalog.schema != CATALOG_SCHEMA {
            return Err(StoreError::UnsupportedSchema {
                found: catalog.schema,
            });
        }
        Ok(catalog)
    }

    fn write_atomic(&self, catalog: &Catalog) -> Result<(), StoreError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };

        fs::create_dir_all(&self.state_dir).map_err(io_err(&self.state_dir))?;
        let path = self.catalog_path();
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(catalog).map_err(StoreError::Serialize)?;

        let mut file = fs::File::create(&tmp_path).map_err(io_err(&tmp_path))?;
        file.write_all(&content).map_err(io_err(&tmp_path))?;
        file.sync_all().map_err(io_err(&tmp_path))?;
        drop(file);

        fs::rename(&tmp_path, &path).map_err(io_err(&path))
    }
}

impl CatalogStore for JsonFileStore {
    fn snapshot(&self) -> Result<Catalog, StoreError> {
        self.load()
    }

    fn commit(&self, catalog: &Catalog) -> Result<u64, StoreError> {
        let _guard = lock_ignoring_poison(&self.write_guard);
        let current = self.load()?;
        check_revision(catalog.revision, current.revision)?;

        let mut next = catalog.clone();
        next.revision = current.revision + 1;
        self.write_atomic(&next)?;
        Ok(next.revision)
    }

    fn location(&self) -> String {
        self.catalog_path().display().to_string()
    }
}

/// In-memory catalog, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    catalog: Mutex<Catalog>,
}

impl MemoryStore {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Mutex::new(catalog),
        }
    }
}

impl CatalogStore for MemoryStore {
    fn snapshot(&self) -> Result<Catalog, StoreError> {
        Ok(lock_ignoring_poison(&self.catalog).clone())
    }

    fn commit(&self, catalog: &Catalog) -> Result<u64, StoreError> {
        let mut current = lock_ignoring_poison(&self.catalog);
        check_revision(catalog.revision, current.revision)?;
        let mut next = catalog.clone();
        next.revision = current.revision + 1;
        *current = next;
        Ok(current.revision)
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
