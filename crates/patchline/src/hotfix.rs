//! Hotfix branches: four-component versions hanging off one parent.

use chrono::Utc;
use patchline_store::Catalog;
use patchline_types::{EventType, ReleaseFile, Version, VersionId};

use crate::error::HotfixError;
use crate::lineage;
use crate::session::Session;

/// Next hotfix number under `parent`: one past the highest sibling, from 1.
pub fn next_hotfix_number(catalog: &Catalog, parent: VersionId) -> u32 {
    catalog
        .hotfix_children(parent)
        .filter_map(|v| v.parts.hotfix())
        .max()
        .map_or(1, |n| n + 1)
}

/// Hotfixes of `parent` ordered by hotfix number.
pub fn hotfixes_of(catalog: &Catalog, parent: VersionId) -> Vec<&Version> {
    let mut hotfixes: Vec<&Version> = catalog.hotfix_children(parent).collect();
    hotfixes.sort_by_key(|v| v.parts.hotfix());
    hotfixes
}

/// Files shipped with a single hotfix.
pub fn hotfix_files<'c>(
    catalog: &'c Catalog,
    hotfix: &str,
) -> Result<Vec<&'c ReleaseFile>, HotfixError> {
    let version = catalog
        .version_by_name(hotfix)
        .ok_or_else(|| HotfixError::UnknownVersion(hotfix.to_string()))?;
    if !version.is_hotfix {
        return Err(HotfixError::NotAHotfix(version.full_version.clone()));
    }
    Ok(catalog.files_of(version.id))
}

impl Session<'_> {
    /// Create the next hotfix of `parent`. The hotfix starts unapproved.
    pub fn create_hotfix(
        &mut self,
        parent: &str,
        comment: Option<String>,
    ) -> Result<Version, HotfixError> {
        let actor = self.actor().to_string();
        let created = self.transact(|catalog| {
            let parent_version = catalog
                .version_by_name(parent.trim())
                .ok_or_else(|| HotfixError::UnknownVersion(parent.trim().to_string()))?
                .clone();
            if parent_version.is_hotfix {
                return Err(HotfixError::ParentIsHotfix {
                    parent: parent_version.full_version,
                });
            }

            let number = next_hotfix_number(catalog, parent_version.id);
            let parts = parent_version.parts.with_hotfix(number);
            let id = VersionId(catalog.allocate_id());
            let version = Version {
                id,
                release_line: parent_version.release_line,
                customer_id: parent_version.customer_id,
                full_version: parts.to_string(),
                parts,
                is_hotfix: true,
                parent_version_id: Some(parent_version.id),
                approval: None,
                created_by: actor.clone(),
                created_at: Utc::now(),
                comment: comment.clone(),
            };
            catalog.versions.insert(id, version.clone());
            lineage::record_creation(catalog, id)?;
            Ok((parent_version.full_version, version))
        })?;

        let (parent_name, version) = created;
        self.emit(
            version.full_version.clone(),
            EventType::HotfixCreated {
                parent: parent_name,
                version: version.full_version.clone(),
            },
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, add_file, add_hotfix, add_standard};
    use patchline_store::{CatalogStore, MemoryStore};
    use patchline_types::Category;

    fn seeded() -> (Fixture, VersionId) {
        let fx = Fixture::new();
        let mut catalog = Catalog::default();
        let id = add_standard(&mut catalog, "1.1.0", true);
        let fx = Fixture {
            store: MemoryStore::new(catalog),
            ..fx
        };
        (fx, id)
    }

    #[test]
    fn numbering_starts_at_one_and_follows_max_sibling() {
        let mut catalog = Catalog::default();
        let parent = add_standard(&mut catalog, "1.1.0", true);
        assert_eq!(next_hotfix_number(&catalog, parent), 1);
        add_hotfix(&mut catalog, parent, 1);
        add_hotfix(&mut catalog, parent, 4);
        assert_eq!(next_hotfix_number(&catalog, parent), 5);
    }

    #[test]
    fn create_hotfix_links_parent_and_lineage() {
        let (fx, parent) = seeded();
        let mut session = Session::new(&fx.store, &fx.storage, "alice");

        let first = session.create_hotfix("1.1.0", Some("urgent".into())).expect("hotfix");
        let second = session.create_hotfix("1.1.0", None).expect("hotfix");
        assert_eq!(first.full_version, "1.1.0.1");
        assert_eq!(second.full_version, "1.1.0.2");
        assert_eq!(first.parent_version_id, Some(parent));
        assert!(first.is_hotfix && !first.is_approved());
        assert_eq!(first.created_by, "alice");

        let catalog = fx.store.snapshot().expect("snapshot");
        assert!(lineage::is_ancestor(&catalog, parent, first.id));
        let listed: Vec<_> = hotfixes_of(&catalog, parent)
            .iter()
            .map(|v| v.full_version.clone())
            .collect();
        assert_eq!(listed, vec!["1.1.0.1", "1.1.0.2"]);
        assert_eq!(session.events().len(), 2);
    }

    #[test]
    fn nested_hotfix_is_rejected() {
        let (fx, _) = seeded();
        let mut session = Session::new(&fx.store, &fx.storage, "alice");
        session.create_hotfix("1.1.0", None).expect("hotfix");

        let err = session.create_hotfix("1.1.0.1", None).unwrap_err();
        assert!(matches!(err, HotfixError::ParentIsHotfix { parent } if parent == "1.1.0.1"));
    }

    #[test]
    fn unknown_parent() {
        let (fx, _) = seeded();
        let mut session = Session::new(&fx.store, &fx.storage, "alice");
        assert!(matches!(
            session.create_hotfix("7.0.0", None),
            Err(HotfixError::UnknownVersion(_))
        ));
    }

    #[test]
    fn hotfix_files_only_for_hotfixes() {
        let mut catalog = Catalog::default();
        let parent = add_standard(&mut catalog, "1.1.0", true);
        let hotfix = add_hotfix(&mut catalog, parent, 1);
        add_file(&mut catalog, hotfix, Category::Web, None, "fix.js", 1);

        let files = hotfix_files(&catalog, "1.1.0.1").expect("files");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "fix.js");
        assert!(matches!(
            hotfix_files(&catalog, "1.1.0"),
            Err(HotfixError::NotAHotfix(_))
        ));
    }
}
