//! Property-based tests for catalog invariants.
//!
//! - Range resolution returns exactly the approved versions after `from`
//!   through `to`, ascending
//! - Unapproved versions inside a range always block it
//! - Lineage: each main-line version descends from everything created before
//!   it on its line
//! - Execution orders stay unique per (version, sub-category)

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use patchline_store::Catalog;
    use patchline_types::{Category, ReleaseLine, VersionId};
    use patchline_version::{compare, parse};
    use proptest::prelude::*;

    use crate::error::RangeError;
    use crate::lineage;
    use crate::range::resolve;
    use crate::test_support::{add_hotfix, add_standard};

    /// Distinct standard version triples, in arbitrary creation order.
    fn triples_strategy() -> impl Strategy<Value = Vec<(u32, u32, u32)>> {
        prop::collection::btree_set((0u32..4, 0u32..4, 0u32..4), 2..12)
            .prop_map(|set| set.into_iter().collect::<Vec<_>>())
            .prop_shuffle()
    }

    fn text((a, b, c): (u32, u32, u32)) -> String {
        format!("{a}.{b}.{c}")
    }

    proptest! {
        /// Property: an all-approved range is exactly the versions strictly
        /// between the endpoints, ascending, regardless of creation order.
        #[test]
        fn range_is_exact_and_ascending(
            triples in triples_strategy(),
            picks in (any::<prop::sample::Index>(), any::<prop::sample::Index>()),
        ) {
            let mut catalog = Catalog::default();
            for t in &triples {
                add_standard(&mut catalog, &text(*t), true);
            }
            let mut sorted = triples.clone();
            sorted.sort();
            let (i, j) = (picks.0.index(sorted.len()), picks.1.index(sorted.len()));
            prop_assume!(i < j);
            let (from, to) = (text(sorted[i]), text(sorted[j]));

            let range = resolve(&catalog, ReleaseLine::Standard, None, &from, &to)
                .expect("range");
            let got: Vec<String> = range.iter().map(|v| v.full_version.clone()).collect();
            let expected: Vec<String> = sorted[i + 1..=j].iter().map(|t| text(*t)).collect();
            prop_assert_eq!(got, expected);
        }

        /// Property: hotfixes never appear in a range.
        #[test]
        fn hotfixes_never_resolve(triples in triples_strategy()) {
            let mut catalog = Catalog::default();
            let mut ids = Vec::new();
            for t in &triples {
                ids.push(add_standard(&mut catalog, &text(*t), true));
            }
            for id in &ids {
                add_hotfix(&mut catalog, *id, 1);
            }
            let mut sorted = triples.clone();
            sorted.sort();
            let (from, to) = (text(sorted[0]), text(sorted[sorted.len() - 1]));

            let range = resolve(&catalog, ReleaseLine::Standard, None, &from, &to)
                .expect("range");
            prop_assert!(range.iter().all(|v| !v.is_hotfix));
            prop_assert_eq!(range.len(), sorted.len() - 1);
        }

        /// Property: every unapproved version inside the range is reported,
        /// and nothing outside it.
        #[test]
        fn approval_gate_names_exactly_the_unapproved(
            triples in triples_strategy(),
            approvals in prop::collection::vec(any::<bool>(), 12),
        ) {
            let mut sorted = triples.clone();
            sorted.sort();
            let mut catalog = Catalog::default();
            for (n, t) in triples.iter().enumerate() {
                // Endpoints are always approved so only members gate the range.
                let endpoint = *t == sorted[0] || *t == sorted[sorted.len() - 1];
                add_standard(&mut catalog, &text(*t), endpoint || approvals[n]);
            }
            let (from, to) = (text(sorted[0]), text(sorted[sorted.len() - 1]));

            let unapproved: Vec<String> = sorted[1..]
                .iter()
                .map(|t| text(*t))
                .filter(|v| !catalog.version_by_name(v).expect("version").is_approved())
                .collect();

            match resolve(&catalog, ReleaseLine::Standard, None, &from, &to) {
                Ok(range) => prop_assert!(unapproved.is_empty() && !range.is_empty()),
                Err(RangeError::UnapprovedVersionsInRange { versions }) => {
                    prop_assert_eq!(versions, unapproved);
                }
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }

        /// Property: a main-line version has exactly the earlier versions of
        /// its line as ancestors, at distinct distances 1..=n.
        #[test]
        fn lineage_covers_everything_created_before(triples in triples_strategy()) {
            let mut catalog = Catalog::default();
            let mut created: Vec<VersionId> = Vec::new();
            for t in &triples {
                let id = add_standard(&mut catalog, &text(*t), false);
                let ancestors = lineage::ancestors_of(&catalog, id);
                let expected: BTreeSet<VersionId> = created.iter().copied().collect();
                prop_assert_eq!(ancestors, expected);

                let distances: BTreeSet<u64> = catalog
                    .edges_to(id)
                    .filter(|e| e.distance > 0)
                    .map(|e| e.distance)
                    .collect();
                prop_assert_eq!(distances, (1..=created.len() as u64).collect::<BTreeSet<_>>());
                created.push(id);
            }
            prop_assert_eq!(
                catalog.line_counter(patchline_types::LineScope::standard()),
                triples.len() as u64
            );
        }

        /// Property: parsing a canonical version and sorting by it agree with
        /// numeric tuple order.
        #[test]
        fn version_order_matches_tuple_order(triples in triples_strategy()) {
            let mut parsed: Vec<_> = triples.iter().map(|t| parse(&text(*t)).expect("parse")).collect();
            parsed.sort_by(|a, b| compare(a, b).expect("comparable"));
            let mut sorted = triples.clone();
            sorted.sort();
            let got: Vec<String> = parsed.iter().map(|p| p.to_string()).collect();
            let expected: Vec<String> = sorted.into_iter().map(text).collect();
            prop_assert_eq!(got, expected);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// Property: execution orders are 1..=n within each (version,
        /// sub-category), whatever order files arrive in.
        #[test]
        fn execution_orders_are_dense_per_sub_category(
            subs in prop::collection::vec(prop_oneof![Just("MARIADB"), Just("CRATEDB"), Just("custom")], 1..16),
        ) {
            let fx = crate::test_support::Fixture::new();
            let mut session = crate::Session::new(&fx.store, &fx.storage, "alice");
            session.create_standard_version("1.0.0", None).expect("create");
            for (n, sub) in subs.iter().enumerate() {
                session
                    .add_file("1.0.0", Category::Database, Some(sub), &format!("{n:03}.sql"), b"x")
                    .expect("add");
            }

            let catalog = patchline_store::CatalogStore::snapshot(&fx.store).expect("snapshot");
            for sub in ["MARIADB", "CRATEDB", "custom"] {
                let orders: Vec<u32> = catalog
                    .files
                    .values()
                    .filter(|f| f.sub_category.as_ref().map(|s| s.as_str()) == Some(sub))
                    .map(|f| f.execution_order)
                    .collect();
                let expected: Vec<u32> = (1..=orders.len() as u32).collect();
                prop_assert_eq!(orders, expected);
            }
        }
    }
}
