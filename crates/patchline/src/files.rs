//! Registering release files against versions.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use patchline_category::{classify_entry_path, validate_sub_category};
use patchline_store::Catalog;
use patchline_types::{
    Category, EventType, FileId, ReleaseFile, SubCategory, UploadEntry, Version, VersionId,
};

use crate::catalog::storage_prefix;
use crate::error::CatalogError;
use crate::reporter::Reporter;
use crate::session::Session;

/// A file name relative to its category directory: `/`-separated, no empty,
/// `.` or `..` segments.
fn check_file_name(file_name: &str) -> Result<(), CatalogError> {
    let valid = !file_name.is_empty()
        && !file_name.contains('\\')
        && file_name
            .split('/')
            .all(|s| !s.is_empty() && s != "." && s != "..");
    if valid {
        Ok(())
    } else {
        Err(CatalogError::InvalidFileName(file_name.to_string()))
    }
}

/// Storage path of a file registered for `version`.
pub fn file_storage_path(
    catalog: &Catalog,
    version: &Version,
    category: Category,
    sub_category: Option<&SubCategory>,
    file_name: &str,
) -> String {
    let prefix = storage_prefix(catalog, version);
    match sub_category {
        Some(sub) => format!("{prefix}/{}/{}/{file_name}", category.dir_name(), sub.as_str()),
        None => format!("{prefix}/{}/{file_name}", category.dir_name()),
    }
}

fn is_registered(
    catalog: &Catalog,
    version: VersionId,
    category: Category,
    sub_category: Option<&SubCategory>,
    file_name: &str,
) -> bool {
    catalog.files.values().any(|f| {
        f.version_id == version
            && f.category == category
            && f.sub_category.as_ref() == sub_category
            && f.file_name == file_name
    })
}

/// Storage prefix uploads are written below before their commit.
pub const STAGING_PREFIX: &str = "staging";

/// A staging directory no other writer, in this process or another, will pick.
fn staging_root() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!(
        "{STAGING_PREFIX}/{}-{nanos}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    )
}

/// A sub-category already in use for `category` whose spelling differs from
/// `sub` only by case. Such pairs would share a patch directory and script.
fn clashing_spelling<'c>(
    catalog: &'c Catalog,
    category: Category,
    sub: &SubCategory,
) -> Option<&'c SubCategory> {
    catalog
        .files
        .values()
        .filter(|f| f.category == category)
        .filter_map(|f| f.sub_category.as_ref())
        .find(|existing| {
            existing.as_str() != sub.as_str() && existing.as_str().eq_ignore_ascii_case(sub.as_str())
        })
}

fn check_spelling(
    catalog: &Catalog,
    category: Category,
    sub: Option<&SubCategory>,
) -> Result<(), CatalogError> {
    match sub.and_then(|s| clashing_spelling(catalog, category, s).map(|e| (s, e))) {
        Some((given, existing)) => Err(CatalogError::SubCategorySpelling {
            given: given.to_string(),
            existing: existing.to_string(),
        }),
        None => Ok(()),
    }
}

/// A file ready to be inserted: validated, awaiting its id and order.
struct Staged {
    category: Category,
    sub_category: Option<SubCategory>,
    file_name: String,
    storage_path: String,
    size: u64,
    checksum: String,
}

fn duplicate(version: &Version, staged: &Staged) -> CatalogError {
    let category = match &staged.sub_category {
        Some(sub) => format!("{}/{}", staged.category, sub),
        None => staged.category.to_string(),
    };
    CatalogError::DuplicateFile {
        version: version.full_version.clone(),
        category,
        file_name: staged.file_name.clone(),
    }
}

/// Insert staged files, assigning execution orders after the current maximum
/// of each sub-category.
fn insert_staged(
    catalog: &mut Catalog,
    version_id: VersionId,
    staged: &[Staged],
) -> Result<Vec<ReleaseFile>, CatalogError> {
    let version = catalog
        .version(version_id)
        .cloned()
        .ok_or_else(|| CatalogError::UnknownVersion(version_id.to_string()))?;

    let mut inserted = Vec::with_capacity(staged.len());
    for file in staged {
        check_spelling(catalog, file.category, file.sub_category.as_ref())?;
        if is_registered(
            catalog,
            version_id,
            file.category,
            file.sub_category.as_ref(),
            &file.file_name,
        ) {
            return Err(duplicate(&version, file));
        }
        let execution_order = catalog.max_execution_order(version_id, file.sub_category.as_ref()) + 1;
        let id = FileId(catalog.allocate_id());
        let record = ReleaseFile {
            id,
            version_id,
            category: file.category,
            sub_category: file.sub_category.clone(),
            file_name: file.file_name.clone(),
            storage_path: file.storage_path.clone(),
            size: file.size,
            checksum: file.checksum.clone(),
            execution_order,
            created_at: Utc::now(),
        };
        catalog.files.insert(id, record.clone());
        inserted.push(record);
    }
    Ok(inserted)
}

impl Session<'_> {
    fn stage(
        &self,
        catalog: &Catalog,
        version: &Version,
        category: Category,
        sub_category: Option<SubCategory>,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Staged, CatalogError> {
        check_file_name(file_name)?;
        let storage_path = file_storage_path(
            catalog,
            version,
            category,
            sub_category.as_ref(),
            file_name,
        );
        Ok(Staged {
            category,
            sub_category,
            file_name: file_name.to_string(),
            storage_path,
            size: bytes.len() as u64,
            checksum: self.storage().checksum(bytes),
        })
    }

    /// Remove a staging directory and whatever is left in it.
    fn discard(&self, staging_root: &str, reporter: &mut dyn Reporter) {
        if let Err(err) = self.storage().delete_prefix(staging_root) {
            reporter.warn(&format!(
                "failed to remove staged objects under {staging_root}: {err}"
            ));
        }
    }

    /// Undo a commit whose objects could not be moved into place.
    fn unregister(&self, inserted: &[ReleaseFile], moved: &[Staged], reporter: &mut dyn Reporter) {
        let ids: Vec<FileId> = inserted.iter().map(|f| f.id).collect();
        let removed = self.transact(|catalog| {
            for id in &ids {
                catalog.files.remove(id);
            }
            Ok::<_, CatalogError>(())
        });
        if let Err(err) = removed {
            reporter.warn(&format!("failed to unregister {} file(s): {err}", ids.len()));
            return;
        }
        for file in moved {
            if let Err(err) = self.storage().delete(&file.storage_path) {
                reporter.warn(&format!(
                    "failed to remove orphaned object {}: {err}",
                    file.storage_path
                ));
            }
        }
    }

    /// Store `bytes` and register them as the next file of `version`.
    pub fn add_file(
        &mut self,
        version: &str,
        category: Category,
        sub_category: Option<&str>,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<ReleaseFile, CatalogError> {
        let sub_category = sub_category
            .map(|raw| validate_sub_category(category, raw))
            .transpose()?;
        let mut files = self.register(
            version,
            vec![(category, sub_category, file_name.to_string(), bytes.to_vec())],
            &mut crate::reporter::NullReporter,
        )?;
        files
            .pop()
            .ok_or_else(|| CatalogError::InvalidFileName(file_name.to_string()))
    }

    /// Register a batch of upload entries in one commit, ordered by path.
    pub fn import_entries(
        &mut self,
        version: &str,
        mut entries: Vec<UploadEntry>,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<ReleaseFile>, CatalogError> {
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        let batch = entries
            .into_iter()
            .map(|e| (e.category, e.sub_category, e.relative_path, e.bytes))
            .collect();
        let files = self.register(version, batch, reporter)?;
        reporter.info(&format!("registered {} file(s) for {version}", files.len()));
        Ok(files)
    }

    fn register(
        &mut self,
        version: &str,
        batch: Vec<(Category, Option<SubCategory>, String, Vec<u8>)>,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<ReleaseFile>, CatalogError> {
        let catalog = self.snapshot()?;
        let target = catalog
            .version_by_name(version.trim())
            .cloned()
            .ok_or_else(|| CatalogError::UnknownVersion(version.trim().to_string()))?;

        let mut staged: Vec<Staged> = Vec::with_capacity(batch.len());
        for (category, sub_category, file_name, bytes) in &batch {
            let file = self.stage(
                &catalog,
                &target,
                *category,
                sub_category.clone(),
                file_name,
                bytes,
            )?;
            check_spelling(&catalog, file.category, file.sub_category.as_ref())?;
            let repeated = staged
                .iter()
                .any(|s| s.storage_path == file.storage_path);
            if repeated
                || is_registered(
                    &catalog,
                    target.id,
                    file.category,
                    file.sub_category.as_ref(),
                    &file.file_name,
                )
            {
                return Err(duplicate(&target, &file));
            }
            staged.push(file);
        }

        // Bytes only reach their registered path once the catalog owns it.
        let staging_root = staging_root();
        let staging: Vec<String> = (0..staged.len())
            .map(|i| format!("{staging_root}/{i}"))
            .collect();
        for (path, (_, _, _, bytes)) in staging.iter().zip(&batch) {
            if let Err(err) = self.storage().save(path, bytes) {
                self.discard(&staging_root, reporter);
                return Err(err.into());
            }
        }

        let inserted = match self.transact(|catalog| insert_staged(catalog, target.id, &staged)) {
            Ok(inserted) => inserted,
            Err(err) => {
                self.discard(&staging_root, reporter);
                return Err(err);
            }
        };

        for (i, (path, file)) in staging.iter().zip(&staged).enumerate() {
            if let Err(err) = self.storage().rename(path, &file.storage_path) {
                self.unregister(&inserted, &staged[..i], reporter);
                self.discard(&staging_root, reporter);
                return Err(err.into());
            }
        }
        self.discard(&staging_root, reporter);

        self.emit(
            target.full_version.clone(),
            EventType::FilesRegistered {
                version: target.full_version.clone(),
                count: inserted.len(),
            },
        );
        Ok(inserted)
    }
}

/// Read an extracted upload directory into entries.
///
/// The directory holds `{category}/{file}` or `{category}/{sub-category}/{path}`
/// entries; any other shape or an unknown category fails the whole upload.
pub fn scan_upload_dir(dir: &Path) -> Result<Vec<UploadEntry>, CatalogError> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<UploadEntry>) -> Result<(), CatalogError> {
        let io_err = |source: io::Error| CatalogError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut children: Vec<_> = fs::read_dir(dir)
            .map_err(io_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;
        children.sort_by_key(|e| e.file_name());

        for child in children {
            let path = child.path();
            if path.is_dir() {
                walk(&path, root, out)?;
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            let classified = classify_entry_path(&relative).map_err(|source| {
                CatalogError::Upload {
                    path: relative.clone(),
                    source,
                }
            })?;
            let bytes = fs::read(&path).map_err(|source| CatalogError::Io {
                path: path.clone(),
                source,
            })?;
            out.push(UploadEntry {
                category: classified.category,
                sub_category: classified.sub_category,
                relative_path: classified.file_name,
                bytes,
            });
        }
        Ok(())
    }

    let mut entries = Vec::new();
    walk(dir, dir, &mut entries)?;
    Ok(entries)
}
