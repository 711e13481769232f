//! Queries over persisted patch records, and their removal.

use std::fs;
use std::io;

use patchline_store::Catalog;
use patchline_types::{CustomerId, EventType, PatchId, PatchRecord, ReleaseLine};

use crate::error::CatalogError;
use crate::reporter::Reporter;
use crate::session::Session;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchFilter {
    pub release_line: Option<ReleaseLine>,
    pub customer_id: Option<CustomerId>,
    /// Matches either endpoint.
    pub version: Option<String>,
}

impl PatchFilter {
    fn matches(&self, record: &PatchRecord) -> bool {
        self.release_line.is_none_or(|line| record.release_line == line)
            && self.customer_id.is_none_or(|id| record.customer_id == Some(id))
            && self
                .version
                .as_deref()
                .is_none_or(|v| record.from_version == v || record.to_version == v)
    }
}

/// Matching patch records, oldest first.
pub fn list_patches<'c>(catalog: &'c Catalog, filter: &PatchFilter) -> Vec<&'c PatchRecord> {
    let mut records: Vec<&PatchRecord> = catalog
        .patches
        .values()
        .filter(|p| filter.matches(p))
        .collect();
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    records
}

impl Session<'_> {
    /// Remove a patch directory, then its record.
    pub fn delete_patch(
        &mut self,
        id: PatchId,
        reporter: &mut dyn Reporter,
    ) -> Result<PatchRecord, CatalogError> {
        let catalog = self.snapshot()?;
        let record = catalog
            .patches
            .get(&id)
            .cloned()
            .ok_or(CatalogError::UnknownPatch(id))?;

        match fs::remove_dir_all(&record.output_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => reporter.warn(&format!(
                "patch directory {} was already gone",
                record.output_path.display()
            )),
            Err(source) => {
                return Err(CatalogError::Io {
                    path: record.output_path.clone(),
                    source,
                });
            }
        }

        self.transact(|catalog| {
            catalog
                .patches
                .remove(&id)
                .map(|_| ())
                .ok_or(CatalogError::UnknownPatch(id))
        })?;

        reporter.info(&format!("deleted patch {}", record.patch_name));
        self.emit(
            record.patch_name.clone(),
            EventType::PatchDeleted { patch_id: id },
        );
        Ok(record)
    }
}
