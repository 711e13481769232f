//! Ancestry bookkeeping between versions of one release line.
//!
//! Every version has a self edge at distance 0. A non-hotfix version gets an
//! edge from every non-hotfix version created before it in the same line, at
//! its distance in creation order (the previous version is 1 away). A hotfix
//! gets an edge from its parent at distance 1 and from each of the parent's
//! ancestors one step further away; hotfixes never become ancestors of later
//! main-line versions.
//!
//! Edges answer membership questions only. Ordering always comes from version
//! comparison.

use std::collections::BTreeSet;

use patchline_store::Catalog;
use patchline_types::{AncestryEdge, Version, VersionId};

use crate::error::LineageError;

/// Add the edges for a version that was just inserted into `catalog`.
///
/// Must run in the same transaction as the insert. Non-hotfix versions also
/// advance their line's creation counter.
pub fn record_creation(
    catalog: &mut Catalog,
    version_id: VersionId,
) -> Result<Vec<AncestryEdge>, LineageError> {
    let version = catalog
        .version(version_id)
        .ok_or(LineageError::UnknownVersion(version_id))?
        .clone();

    let mut edges = vec![AncestryEdge {
        ancestor: version_id,
        descendant: version_id,
        distance: 0,
    }];

    if version.is_hotfix {
        let parent = version
            .parent_version_id
            .ok_or_else(|| LineageError::MissingParent(version.full_version.clone()))?;
        if catalog.version(parent).is_none() {
            return Err(LineageError::UnknownVersion(parent));
        }
        let mut inherited: Vec<AncestryEdge> = catalog
            .edges_to(parent)
            .map(|edge| AncestryEdge {
                ancestor: edge.ancestor,
                descendant: version_id,
                distance: edge.distance + 1,
            })
            .collect();
        inherited.sort();
        edges.extend(inherited);
    } else {
        let scope = version.scope();
        let mut earlier: Vec<VersionId> = catalog
            .versions_in_scope(scope)
            .filter(|v| !v.is_hotfix && v.id < version_id)
            .map(|v| v.id)
            .collect();
        earlier.sort_unstable_by(|a, b| b.cmp(a));
        edges.extend(
            earlier
                .into_iter()
                .zip(1u64..)
                .map(|(ancestor, distance)| AncestryEdge {
                    ancestor,
                    descendant: version_id,
                    distance,
                }),
        );
        catalog.advance_line_counter(scope);
    }

    catalog.edges.extend(edges.iter().copied());
    Ok(edges)
}

/// Drop every edge mentioning `version_id`; returns how many were removed.
pub fn remove_version(catalog: &mut Catalog, version_id: VersionId) -> usize {
    let before = catalog.edges.len();
    catalog
        .edges
        .retain(|e| e.ancestor != version_id && e.descendant != version_id);
    before - catalog.edges.len()
}

/// Strict ancestors of `version_id`.
pub fn ancestors_of(catalog: &Catalog, version_id: VersionId) -> BTreeSet<VersionId> {
    catalog
        .edges_to(version_id)
        .filter(|e| e.distance > 0)
        .map(|e| e.ancestor)
        .collect()
}

/// Strict descendants of `version_id`.
pub fn descendants_of(catalog: &Catalog, version_id: VersionId) -> BTreeSet<VersionId> {
    catalog
        .edges_from(version_id)
        .filter(|e| e.distance > 0)
        .map(|e| e.descendant)
        .collect()
}

pub fn is_ancestor(catalog: &Catalog, ancestor: VersionId, descendant: VersionId) -> bool {
    catalog
        .edges_to(descendant)
        .any(|e| e.ancestor == ancestor && e.distance > 0)
}

/// Ancestors of `version_id` with their distance, nearest first.
pub fn lineage_of(catalog: &Catalog, version_id: VersionId) -> Vec<(&Version, u64)> {
    let mut entries: Vec<(&Version, u64)> = catalog
        .edges_to(version_id)
        .filter(|e| e.distance > 0)
        .filter_map(|e| catalog.version(e.ancestor).map(|v| (v, e.distance)))
        .collect();
    entries.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.id.cmp(&b.0.id)));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_custom, add_customer, add_hotfix, add_standard};
    use patchline_types::LineScope;

    fn distances(catalog: &Catalog, id: VersionId) -> Vec<(String, u64)> {
        lineage_of(catalog, id)
            .into_iter()
            .map(|(v, d)| (v.full_version.clone(), d))
            .collect()
    }

    #[test]
    fn every_version_has_a_self_edge() {
        let mut catalog = Catalog::default();
        let v = add_standard(&mut catalog, "1.0.0", true);
        assert!(catalog.edges.contains(&AncestryEdge {
            ancestor: v,
            descendant: v,
            distance: 0
        }));
        assert!(ancestors_of(&catalog, v).is_empty());
    }

    #[test]
    fn standard_versions_link_to_all_earlier_ones_by_creation_distance() {
        let mut catalog = Catalog::default();
        let a = add_standard(&mut catalog, "1.0.0", true);
        let b = add_standard(&mut catalog, "1.1.0", true);
        let c = add_standard(&mut catalog, "1.2.0", true);

        assert_eq!(
            distances(&catalog, c),
            vec![("1.1.0".to_string(), 1), ("1.0.0".to_string(), 2)]
        );
        assert_eq!(descendants_of(&catalog, a), BTreeSet::from([b, c]));
        assert_eq!(catalog.line_counter(LineScope::standard()), 3);
    }

    #[test]
    fn creation_order_not_version_order_drives_distance() {
        let mut catalog = Catalog::default();
        add_standard(&mut catalog, "2.0.0", true);
        let late = add_standard(&mut catalog, "1.5.0", true);
        assert_eq!(distances(&catalog, late), vec![("2.0.0".to_string(), 1)]);
    }

    #[test]
    fn lines_do_not_share_edges() {
        let mut catalog = Catalog::default();
        let base = add_standard(&mut catalog, "1.3.0", true);
        let acme = add_customer(&mut catalog, "ACME", Some(base));
        let c1 = add_custom(&mut catalog, acme, "1.0.0", true);
        let s2 = add_standard(&mut catalog, "1.4.0", true);

        assert!(ancestors_of(&catalog, c1).is_empty());
        assert_eq!(ancestors_of(&catalog, s2), BTreeSet::from([base]));
        assert_eq!(catalog.line_counter(LineScope::custom(acme)), 1);
    }

    #[test]
    fn hotfix_inherits_parent_ancestry_without_advancing_counter() {
        let mut catalog = Catalog::default();
        let a = add_standard(&mut catalog, "1.0.0", true);
        let b = add_standard(&mut catalog, "1.1.0", true);
        let h = add_hotfix(&mut catalog, b, 1);

        assert_eq!(
            distances(&catalog, h),
            vec![("1.1.0".to_string(), 1), ("1.0.0".to_string(), 2)]
        );
        assert!(is_ancestor(&catalog, a, h));
        assert_eq!(catalog.line_counter(LineScope::standard()), 2);

        let c = add_standard(&mut catalog, "1.2.0", true);
        assert!(!ancestors_of(&catalog, c).contains(&h));
    }

    #[test]
    fn remove_version_drops_both_directions() {
        let mut catalog = Catalog::default();
        let a = add_standard(&mut catalog, "1.0.0", true);
        let b = add_standard(&mut catalog, "1.1.0", true);
        let c = add_standard(&mut catalog, "1.2.0", true);

        let removed = remove_version(&mut catalog, b);
        // self edge, a->b, b->c
        assert_eq!(removed, 3);
        assert_eq!(ancestors_of(&catalog, c), BTreeSet::from([a]));
        assert!(catalog.edges_to(b).next().is_none());
    }

    #[test]
    fn unknown_version_is_an_error() {
        let mut catalog = Catalog::default();
        assert_eq!(
            record_creation(&mut catalog, VersionId(42)),
            Err(LineageError::UnknownVersion(VersionId(42)))
        );
    }
}
