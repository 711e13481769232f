//! Customer and version registry.
//!
//! Creating a version inserts the version and its ancestry edges in one
//! catalog commit, so the lineage is never observed half-written.

use std::cmp::Ordering;

use chrono::Utc;
use patchline_store::Catalog;
use patchline_types::{
    Approval, Customer, CustomerId, EventType, LineScope, ReleaseLine, Version, VersionId,
    VersionParts,
};
use patchline_version::{compare, group_key, is_valid_customer_code};

use crate::error::CatalogError;
use crate::lineage;
use crate::reporter::Reporter;
use crate::session::Session;

/// Storage directory holding every file of `version`.
pub fn storage_prefix(catalog: &Catalog, version: &Version) -> String {
    let customer = version
        .customer_id
        .and_then(|id| catalog.customer(id))
        .map(|c| c.code.as_str());
    match (version.release_line, customer) {
        (ReleaseLine::Custom, Some(code)) => {
            format!("versions/CUSTOM/{code}/{}", version.full_version)
        }
        _ => format!("versions/{}/{}", version.release_line, version.full_version),
    }
}

/// Display order: by base version, then by version within the base.
pub fn tree_order(a: &Version, b: &Version) -> Ordering {
    let by_base = compare(&a.parts.base(), &b.parts.base()).unwrap_or(Ordering::Equal);
    by_base.then_with(|| {
        compare(&a.parts, &b.parts).unwrap_or_else(|_| a.full_version.cmp(&b.full_version))
    })
}

/// A main-line version and its hotfixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionNode<'c> {
    pub version: &'c Version,
    pub hotfixes: Vec<&'c Version>,
}

/// Versions sharing a `M.m.x` group key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionGroup<'c> {
    pub key: String,
    pub versions: Vec<VersionNode<'c>>,
}

/// Versions of `scope` grouped by `M.m.x`, hotfixes nested under their parent.
pub fn version_tree(catalog: &Catalog, scope: LineScope) -> Vec<VersionGroup<'_>> {
    let mut main: Vec<&Version> = catalog
        .versions_in_scope(scope)
        .filter(|v| !v.is_hotfix)
        .collect();
    main.sort_by(|a, b| tree_order(a, b));

    let mut groups: Vec<VersionGroup<'_>> = Vec::new();
    for version in main {
        let node = VersionNode {
            version,
            hotfixes: crate::hotfix::hotfixes_of(catalog, version.id),
        };
        let key = group_key(&version.parts);
        match groups.last_mut() {
            Some(group) if group.key == key => group.versions.push(node),
            _ => groups.push(VersionGroup {
                key,
                versions: vec![node],
            }),
        }
    }
    groups
}

/// Every version of `scope` in display order, each parent followed by its hotfixes.
pub fn list_versions(catalog: &Catalog, scope: LineScope) -> Vec<&Version> {
    version_tree(catalog, scope)
        .into_iter()
        .flat_map(|group| group.versions)
        .flat_map(|node| std::iter::once(node.version).chain(node.hotfixes))
        .collect()
}

fn find_version<'c>(catalog: &'c Catalog, name: &str) -> Result<&'c Version, CatalogError> {
    catalog
        .version_by_name(name.trim())
        .ok_or_else(|| CatalogError::UnknownVersion(name.trim().to_string()))
}

fn find_customer<'c>(catalog: &'c Catalog, code: &str) -> Result<&'c Customer, CatalogError> {
    catalog
        .customer_by_code(code.trim())
        .ok_or_else(|| CatalogError::UnknownCustomer(code.trim().to_string()))
}

/// Resolve a customer code to its id, if one was given.
pub fn customer_id(catalog: &Catalog, code: Option<&str>) -> Result<Option<CustomerId>, CatalogError> {
    code.map(|c| find_customer(catalog, c).map(|customer| customer.id))
        .transpose()
}

fn ensure_unique(catalog: &Catalog, scope: LineScope, parts: &VersionParts) -> Result<(), CatalogError> {
    if catalog.versions_in_scope(scope).any(|v| &v.parts == parts) {
        return Err(CatalogError::DuplicateVersion {
            version: parts.to_string(),
            scope: scope.to_string(),
        });
    }
    Ok(())
}

fn plain_triple(text: &str) -> Result<VersionParts, CatalogError> {
    let parts = patchline_version::parse(text)?;
    if parts.is_hotfix() || parts.is_custom() {
        return Err(CatalogError::InvalidVersion {
            version: text.trim().to_string(),
            reason: "expected a plain M.m.p version".to_string(),
        });
    }
    Ok(parts)
}

impl Session<'_> {
    pub fn create_customer(&mut self, code: &str, name: &str) -> Result<Customer, CatalogError> {
        let code = code.trim();
        if !is_valid_customer_code(code) {
            return Err(CatalogError::InvalidCustomerCode(code.to_string()));
        }
        self.transact(|catalog| {
            if catalog
                .customers
                .values()
                .any(|c| c.code.eq_ignore_ascii_case(code))
            {
                return Err(CatalogError::DuplicateCustomer(code.to_string()));
            }
            let id = CustomerId(catalog.allocate_id());
            let customer = Customer {
                id,
                code: code.to_string(),
                name: name.trim().to_string(),
                base_version_id: None,
                created_at: Utc::now(),
            };
            catalog.customers.insert(id, customer.clone());
            Ok(customer)
        })
    }

    /// Anchor a customer's future custom versions to a standard version.
    pub fn set_customer_base(&mut self, code: &str, base: &str) -> Result<Customer, CatalogError> {
        self.transact(|catalog| {
            let base_version = find_version(catalog, base)?;
            if base_version.release_line != ReleaseLine::Standard || base_version.is_hotfix {
                return Err(CatalogError::InvalidVersion {
                    version: base_version.full_version.clone(),
                    reason: "a customer base must be a non-hotfix STANDARD version".to_string(),
                });
            }
            let base_id = base_version.id;
            let customer_id = find_customer(catalog, code)?.id;
            let customer = catalog
                .customers
                .get_mut(&customer_id)
                .ok_or_else(|| CatalogError::UnknownCustomer(code.to_string()))?;
            customer.base_version_id = Some(base_id);
            Ok(customer.clone())
        })
    }

    pub fn create_standard_version(
        &mut self,
        version: &str,
        comment: Option<String>,
    ) -> Result<Version, CatalogError> {
        let parts = plain_triple(version)?;
        let created = self.insert_version(ReleaseLine::Standard, comment, |_| {
            Ok((parts.clone(), None))
        })?;
        Ok(created)
    }

    /// Create `{base}-{code}.{custom}` on the customer's current base.
    pub fn create_custom_version(
        &mut self,
        customer_code: &str,
        custom: &str,
        comment: Option<String>,
    ) -> Result<Version, CatalogError> {
        let triple = plain_triple(custom)?;
        self.insert_version(ReleaseLine::Custom, comment, |catalog| {
            let customer = find_customer(catalog, customer_code)?;
            let base_id = customer
                .base_version_id
                .ok_or_else(|| CatalogError::CustomerHasNoBase(customer.code.clone()))?;
            let base = catalog
                .version(base_id)
                .ok_or_else(|| CatalogError::UnknownVersion(base_id.to_string()))?;
            let parts = VersionParts::custom(
                &base.parts,
                &customer.code,
                triple.major(),
                triple.minor(),
                triple.patch(),
            )?;
            Ok((parts, Some(customer.id)))
        })
    }

    /// `place` picks the parts and owning customer from the committing snapshot.
    fn insert_version<P>(
        &mut self,
        release_line: ReleaseLine,
        comment: Option<String>,
        place: P,
    ) -> Result<Version, CatalogError>
    where
        P: Fn(&Catalog) -> Result<(VersionParts, Option<CustomerId>), CatalogError>,
    {
        let actor = self.actor().to_string();
        let version = self.transact(|catalog| {
            let (parts, customer_id) = place(catalog)?;
            let scope = LineScope {
                release_line,
                customer_id,
            };
            ensure_unique(catalog, scope, &parts)?;
            let id = VersionId(catalog.allocate_id());
            let version = Version {
                id,
                release_line,
                customer_id,
                parts: parts.clone(),
                full_version: parts.to_string(),
                is_hotfix: false,
                parent_version_id: None,
                approval: None,
                created_by: actor.clone(),
                created_at: Utc::now(),
                comment: comment.clone(),
            };
            catalog.versions.insert(id, version.clone());
            lineage::record_creation(catalog, id)?;
            Ok::<_, CatalogError>(version)
        })?;

        self.emit(
            version.full_version.clone(),
            EventType::VersionCreated {
                version: version.full_version.clone(),
            },
        );
        Ok(version)
    }

    /// Approve `version` as the session's actor. Approval happens once.
    pub fn approve_version(&mut self, version: &str) -> Result<Version, CatalogError> {
        let approver = self.actor().to_string();
        let approved = self.transact(|catalog| {
            let id = find_version(catalog, version)?.id;
            let entry = catalog
                .versions
                .get_mut(&id)
                .ok_or_else(|| CatalogError::UnknownVersion(version.to_string()))?;
            if let Some(existing) = &entry.approval {
                return Err(CatalogError::AlreadyApproved {
                    version: entry.full_version.clone(),
                    approved_by: existing.approved_by.clone(),
                });
            }
            entry.approval = Some(Approval {
                approved_by: approver.clone(),
                approved_at: Utc::now(),
            });
            Ok(entry.clone())
        })?;

        self.emit(
            approved.full_version.clone(),
            EventType::VersionApproved {
                version: approved.full_version.clone(),
                approved_by: approver,
            },
        );
        Ok(approved)
    }

    pub fn update_comment(
        &mut self,
        version: &str,
        comment: Option<String>,
    ) -> Result<Version, CatalogError> {
        self.transact(|catalog| {
            let id = find_version(catalog, version)?.id;
            let entry = catalog
                .versions
                .get_mut(&id)
                .ok_or_else(|| CatalogError::UnknownVersion(version.to_string()))?;
            entry.comment = comment.clone().filter(|c| !c.trim().is_empty());
            Ok(entry.clone())
        })
    }

    /// Remove a version with its files, lineage edges and storage directory.
    ///
    /// Refused while hotfixes hang off the version, a patch uses it as an
    /// endpoint, or a customer is anchored to it.
    pub fn delete_version(
        &mut self,
        version: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<Version, CatalogError> {
        let (removed, storage_paths, prefix) = self.transact(|catalog| {
            let target = find_version(catalog, version)?.clone();

            let hotfixes: Vec<String> = crate::hotfix::hotfixes_of(catalog, target.id)
                .iter()
                .map(|v| v.full_version.clone())
                .collect();
            if !hotfixes.is_empty() {
                return Err(CatalogError::HasHotfixes {
                    version: target.full_version,
                    hotfixes,
                });
            }

            let patches: Vec<String> = catalog
                .patches_referencing(target.id)
                .map(|p| p.patch_name.clone())
                .collect();
            if !patches.is_empty() {
                return Err(CatalogError::ReferencedByPatches {
                    version: target.full_version,
                    patches,
                });
            }

            if let Some(customer) = catalog
                .customers
                .values()
                .find(|c| c.base_version_id == Some(target.id))
            {
                return Err(CatalogError::InvalidVersion {
                    version: target.full_version.clone(),
                    reason: format!("it is the base of customer {}", customer.code),
                });
            }

            let prefix = storage_prefix(catalog, &target);
            let mut storage_paths = Vec::new();
            catalog.files.retain(|_, f| {
                if f.version_id == target.id {
                    storage_paths.push(f.storage_path.clone());
                    false
                } else {
                    true
                }
            });
            lineage::remove_version(catalog, target.id);
            catalog.versions.remove(&target.id);
            Ok((target, storage_paths, prefix))
        })?;

        for path in &storage_paths {
            if let Err(err) = self.storage().delete(path) {
                reporter.warn(&format!("failed to delete stored file {path}: {err}"));
            }
        }
        if let Err(err) = self.storage().delete_prefix(&prefix) {
            reporter.warn(&format!("failed to delete storage directory {prefix}: {err}"));
        }
        reporter.info(&format!(
            "deleted {} with {} file(s)",
            removed.full_version,
            storage_paths.len()
        ));

        self.emit(
            removed.full_version.clone(),
            EventType::VersionDeleted {
                version: removed.full_version.clone(),
            },
        );
        Ok(removed)
    }
}
