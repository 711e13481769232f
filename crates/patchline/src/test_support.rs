//! Catalog builders shared by unit tests.

use std::sync::Mutex;

use chrono::Utc;
use patchline_storage::FileStorage;
use patchline_store::{Catalog, CatalogStore, MemoryStore, StoreError};
use patchline_types::{
    Approval, Category, Customer, CustomerId, FileId, ReleaseFile, ReleaseLine, SubCategory,
    Version, VersionId, VersionParts,
};
use tempfile::TempDir;

use crate::lineage;

fn insert(catalog: &mut Catalog, mut version: Version, approved: bool) -> VersionId {
    let id = VersionId(catalog.allocate_id());
    version.id = id;
    if approved {
        version.approval = Some(Approval {
            approved_by: "qa".to_string(),
            approved_at: Utc::now(),
        });
    }
    catalog.versions.insert(id, version);
    lineage::record_creation(catalog, id).expect("record lineage");
    id
}

fn blank(parts: VersionParts, release_line: ReleaseLine, customer_id: Option<CustomerId>) -> Version {
    Version {
        id: VersionId(0),
        release_line,
        customer_id,
        full_version: parts.to_string(),
        is_hotfix: parts.is_hotfix(),
        parts,
        parent_version_id: None,
        approval: None,
        created_by: "tester".to_string(),
        created_at: Utc::now(),
        comment: None,
    }
}

pub fn add_standard(catalog: &mut Catalog, text: &str, approved: bool) -> VersionId {
    let parts = patchline_version::parse(text).expect("standard version");
    insert(catalog, blank(parts, ReleaseLine::Standard, None), approved)
}

pub fn add_customer(catalog: &mut Catalog, code: &str, base: Option<VersionId>) -> CustomerId {
    let id = CustomerId(catalog.allocate_id());
    catalog.customers.insert(
        id,
        Customer {
            id,
            code: code.to_string(),
            name: format!("{code} Corp"),
            base_version_id: base,
            created_at: Utc::now(),
        },
    );
    id
}

/// Add `{base}-{code}.{triple}` on the customer's current base.
pub fn add_custom(
    catalog: &mut Catalog,
    customer: CustomerId,
    triple: &str,
    approved: bool,
) -> VersionId {
    let (code, base_id) = {
        let c = catalog.customer(customer).expect("customer");
        (c.code.clone(), c.base_version_id.expect("customer base"))
    };
    let base = catalog.version(base_id).expect("base").parts.clone();
    let t = patchline_version::parse(triple).expect("triple");
    let parts = VersionParts::custom(&base, &code, t.major(), t.minor(), t.patch()).expect("custom");
    insert(
        catalog,
        blank(parts, ReleaseLine::Custom, Some(customer)),
        approved,
    )
}

pub fn add_hotfix(catalog: &mut Catalog, parent: VersionId, number: u32) -> VersionId {
    let parent_version = catalog.version(parent).expect("parent").clone();
    let mut version = blank(
        parent_version.parts.with_hotfix(number),
        parent_version.release_line,
        parent_version.customer_id,
    );
    version.parent_version_id = Some(parent);
    insert(catalog, version, false)
}

pub fn add_file(
    catalog: &mut Catalog,
    version: VersionId,
    category: Category,
    sub_category: Option<&str>,
    file_name: &str,
    execution_order: u32,
) -> FileId {
    let id = FileId(catalog.allocate_id());
    let full = catalog.version(version).expect("version").full_version.clone();
    catalog.files.insert(
        id,
        ReleaseFile {
            id,
            version_id: version,
            category,
            sub_category: sub_category.map(|s| SubCategory::from(s.to_string())),
            file_name: file_name.to_string(),
            storage_path: format!("versions/{full}/{file_name}"),
            size: 0,
            checksum: String::new(),
            execution_order,
            created_at: Utc::now(),
        },
    );
    id
}

/// In-memory catalog plus on-disk storage and output directories.
pub struct Fixture {
    pub dir: TempDir,
    pub store: MemoryStore,
    pub storage: FileStorage,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path().join("storage"));
        Self {
            dir,
            store: MemoryStore::default(),
            storage,
        }
    }

    pub fn output_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("patches")
    }
}

/// Wraps a [`MemoryStore`] and runs `hook` once, right after handing out the
/// first snapshot, so another writer can commit in between.
pub struct InterleavingStore<'a> {
    inner: &'a MemoryStore,
    hook: Mutex<Option<Box<dyn FnOnce() + Send + 'a>>>,
}

impl<'a> InterleavingStore<'a> {
    pub fn new(inner: &'a MemoryStore, hook: impl FnOnce() + Send + 'a) -> Self {
        Self {
            inner,
            hook: Mutex::new(Some(Box::new(hook))),
        }
    }
}

impl CatalogStore for InterleavingStore<'_> {
    fn snapshot(&self) -> Result<Catalog, StoreError> {
        let catalog = self.inner.snapshot()?;
        let hook = self.hook.lock().expect("hook lock").take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(catalog)
    }

    fn commit(&self, catalog: &Catalog) -> Result<u64, StoreError> {
        self.inner.commit(catalog)
    }

    fn location(&self) -> String {
        "interleaving".to_string()
    }
}
