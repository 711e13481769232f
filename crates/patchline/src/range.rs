//! Resolution of "every version after `from` up to and including `to`".
//!
//! Resolution reads one catalog snapshot, so approval state cannot change
//! half-way through. Hotfixes are never part of a range, neither as members
//! nor as endpoints.

use std::cmp::Ordering;

use patchline_store::Catalog;
use patchline_types::{CustomerId, ReleaseLine, Version};
use patchline_version::{check_comparable, compare, sort_by_version};

use crate::error::RangeError;

fn scope_mismatch(reason: impl Into<String>) -> RangeError {
    RangeError::ScopeMismatch {
        reason: reason.into(),
    }
}

fn lookup<'c>(catalog: &'c Catalog, name: &str) -> Result<&'c Version, RangeError> {
    catalog
        .version_by_name(name.trim())
        .ok_or_else(|| RangeError::UnknownVersion(name.trim().to_string()))
}

/// How `from` relates to the line of `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Start {
    /// `from` is a version of the same line.
    SameLine,
    /// `from` is the standard base of a custom `to`.
    Base,
}

fn check_scope(
    release_line: ReleaseLine,
    customer_id: Option<CustomerId>,
    from: &Version,
    to: &Version,
) -> Result<Start, RangeError> {
    for endpoint in [from, to] {
        if endpoint.is_hotfix {
            return Err(scope_mismatch(format!(
                "hotfix `{}` cannot be a patch endpoint",
                endpoint.full_version
            )));
        }
    }

    match release_line {
        ReleaseLine::Standard => {
            if customer_id.is_some() {
                return Err(scope_mismatch("a STANDARD range takes no customer"));
            }
            for endpoint in [from, to] {
                if endpoint.release_line != ReleaseLine::Standard {
                    return Err(scope_mismatch(format!(
                        "`{}` is not a STANDARD version",
                        endpoint.full_version
                    )));
                }
            }
            Ok(Start::SameLine)
        }
        ReleaseLine::Custom => {
            let customer_id =
                customer_id.ok_or_else(|| scope_mismatch("a CUSTOM range needs a customer"))?;
            if to.release_line != ReleaseLine::Custom || to.customer_id != Some(customer_id) {
                return Err(scope_mismatch(format!(
                    "`{}` is not a version of this customer",
                    to.full_version
                )));
            }
            match from.release_line {
                ReleaseLine::Custom if from.customer_id == Some(customer_id) => Ok(Start::SameLine),
                ReleaseLine::Custom => Err(scope_mismatch(format!(
                    "`{}` belongs to another customer",
                    from.full_version
                ))),
                ReleaseLine::Standard if from.parts == to.parts.base() => Ok(Start::Base),
                ReleaseLine::Standard => Err(scope_mismatch(format!(
                    "`{}` is not the base of `{}`",
                    from.full_version, to.full_version
                ))),
            }
        }
    }
}

/// A resolved range must be non-empty and fully approved.
fn check_members(from: &Version, to: &Version, members: &[&Version]) -> Result<(), RangeError> {
    let unapproved: Vec<String> = members
        .iter()
        .filter(|v| !v.is_approved())
        .map(|v| v.full_version.clone())
        .collect();
    if !unapproved.is_empty() {
        return Err(RangeError::UnapprovedVersionsInRange {
            versions: unapproved,
        });
    }
    // `resolve` always selects `to`, so an empty set means the scan is broken.
    if members.is_empty() {
        return Err(RangeError::NoVersionsInRange {
            from: from.full_version.clone(),
            to: to.full_version.clone(),
        });
    }
    Ok(())
}

/// Versions strictly after `from` up to and including `to`, ascending.
///
/// For a CUSTOM range `from` may be the STANDARD version the customer line is
/// anchored to, which selects every custom version up to `to` on that base.
pub fn resolve<'c>(
    catalog: &'c Catalog,
    release_line: ReleaseLine,
    customer_id: Option<CustomerId>,
    from: &str,
    to: &str,
) -> Result<Vec<&'c Version>, RangeError> {
    let from_version = lookup(catalog, from)?;
    let to_version = lookup(catalog, to)?;
    let start = check_scope(release_line, customer_id, from_version, to_version)?;

    if start == Start::SameLine {
        let order = compare(&from_version.parts, &to_version.parts)
            .map_err(|e| scope_mismatch(e.to_string()))?;
        if order != Ordering::Less {
            return Err(RangeError::InvalidOrder {
                from: from_version.full_version.clone(),
                to: to_version.full_version.clone(),
            });
        }
    }

    let mut candidates: Vec<&Version> = Vec::new();
    for v in catalog.versions_in_scope(to_version.scope()) {
        if v.is_hotfix || check_comparable(&v.parts, &to_version.parts).is_err() {
            continue;
        }
        let after_from = match start {
            Start::Base => true,
            Start::SameLine => compare(&from_version.parts, &v.parts)
                .map(|o| o == Ordering::Less)
                .unwrap_or(false),
        };
        let up_to = compare(&v.parts, &to_version.parts)
            .map(|o| o != Ordering::Greater)
            .unwrap_or(false);
        if after_from && up_to {
            candidates.push(v);
        }
    }

    sort_by_version(&mut candidates, |v| &v.parts).map_err(|e| scope_mismatch(e.to_string()))?;

    check_members(from_version, to_version, &candidates)?;
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_custom, add_customer, add_hotfix, add_standard};

    fn names(versions: &[&Version]) -> Vec<String> {
        versions.iter().map(|v| v.full_version.clone()).collect()
    }

    fn three_standard(approve_middle: bool) -> Catalog {
        let mut catalog = Catalog::default();
        add_standard(&mut catalog, "1.0.0", true);
        add_standard(&mut catalog, "1.1.0", approve_middle);
        add_standard(&mut catalog, "1.2.0", true);
        catalog
    }

    #[test]
    fn resolves_versions_after_from_through_to() {
        let catalog = three_standard(true);
        let range = resolve(&catalog, ReleaseLine::Standard, None, "1.0.0", "1.2.0").expect("range");
        assert_eq!(names(&range), vec!["1.1.0", "1.2.0"]);
    }

    #[test]
    fn reversed_endpoints_are_invalid_order() {
        let catalog = three_standard(true);
        let err = resolve(&catalog, ReleaseLine::Standard, None, "1.2.0", "1.0.0").unwrap_err();
        assert!(matches!(err, RangeError::InvalidOrder { .. }));

        let same = resolve(&catalog, ReleaseLine::Standard, None, "1.1.0", "1.1.0").unwrap_err();
        assert!(matches!(same, RangeError::InvalidOrder { .. }));
    }

    #[test]
    fn unapproved_versions_are_all_named() {
        let mut catalog = three_standard(false);
        add_standard(&mut catalog, "1.1.5", false);
        let err = resolve(&catalog, ReleaseLine::Standard, None, "1.0.0", "1.2.0").unwrap_err();
        match err {
            RangeError::UnapprovedVersionsInRange { versions } => {
                assert_eq!(versions, vec!["1.1.0".to_string(), "1.1.5".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unapproved_endpoint_outside_range_does_not_matter() {
        let mut catalog = Catalog::default();
        add_standard(&mut catalog, "1.0.0", false);
        add_standard(&mut catalog, "1.1.0", true);
        let range = resolve(&catalog, ReleaseLine::Standard, None, "1.0.0", "1.1.0").expect("range");
        assert_eq!(names(&range), vec!["1.1.0"]);
    }

    #[test]
    fn hotfixes_are_never_in_range() {
        let mut catalog = three_standard(true);
        let v110 = catalog.version_by_name("1.1.0").expect("1.1.0").id;
        add_hotfix(&mut catalog, v110, 1);
        let v100 = catalog.version_by_name("1.0.0").expect("1.0.0").id;
        add_hotfix(&mut catalog, v100, 1);

        let range = resolve(&catalog, ReleaseLine::Standard, None, "1.0.0", "1.2.0").expect("range");
        assert_eq!(names(&range), vec!["1.1.0", "1.2.0"]);
    }

    #[test]
    fn hotfix_endpoints_are_rejected() {
        let mut catalog = three_standard(true);
        let v110 = catalog.version_by_name("1.1.0").expect("1.1.0").id;
        add_hotfix(&mut catalog, v110, 1);

        let err = resolve(&catalog, ReleaseLine::Standard, None, "1.0.0", "1.1.0.1").unwrap_err();
        assert!(matches!(err, RangeError::ScopeMismatch { .. }));
    }

    #[test]
    fn single_intervening_version() {
        let catalog = three_standard(true);
        let range = resolve(&catalog, ReleaseLine::Standard, None, "1.1.0", "1.2.0").expect("range");
        assert_eq!(names(&range), vec!["1.2.0"]);
    }

    #[test]
    fn sparse_gap_selects_only_the_target() {
        let mut catalog = Catalog::default();
        add_standard(&mut catalog, "1.0.0", true);
        add_standard(&mut catalog, "2.0.0", true);
        let range = resolve(&catalog, ReleaseLine::Standard, None, "1.0.0", "2.0.0").expect("range");
        assert_eq!(names(&range), vec!["2.0.0"]);
    }

    #[test]
    fn empty_member_set_is_rejected() {
        let catalog = three_standard(false);
        let from = catalog.version_by_name("1.0.0").expect("1.0.0");
        let to = catalog.version_by_name("1.2.0").expect("1.2.0");
        let middle = catalog.version_by_name("1.1.0").expect("1.1.0");

        let err = check_members(from, to, &[]).unwrap_err();
        assert!(matches!(
            err,
            RangeError::NoVersionsInRange { from, to } if from == "1.0.0" && to == "1.2.0"
        ));
        assert!(matches!(
            check_members(from, to, &[middle, to]),
            Err(RangeError::UnapprovedVersionsInRange { versions }) if versions == vec!["1.1.0"]
        ));
        check_members(from, to, &[to]).expect("approved target");
    }

    #[test]
    fn unknown_endpoint() {
        let catalog = three_standard(true);
        let err = resolve(&catalog, ReleaseLine::Standard, None, "1.0.0", "9.9.9").unwrap_err();
        assert!(matches!(err, RangeError::UnknownVersion(v) if v == "9.9.9"));
    }

    #[test]
    fn custom_range_from_base_includes_first_custom_version() {
        let mut catalog = Catalog::default();
        let base = add_standard(&mut catalog, "1.3.0", true);
        add_standard(&mut catalog, "1.4.0", true);
        let acme = add_customer(&mut catalog, "ACME", Some(base));
        add_custom(&mut catalog, acme, "1.0.0", true);
        add_custom(&mut catalog, acme, "1.1.0", true);

        let first = resolve(
            &catalog,
            ReleaseLine::Custom,
            Some(acme),
            "1.3.0",
            "1.3.0-ACME.1.0.0",
        )
        .expect("range");
        assert_eq!(names(&first), vec!["1.3.0-ACME.1.0.0"]);

        let both = resolve(
            &catalog,
            ReleaseLine::Custom,
            Some(acme),
            "1.3.0",
            "1.3.0-ACME.1.1.0",
        )
        .expect("range");
        assert_eq!(names(&both), vec!["1.3.0-ACME.1.0.0", "1.3.0-ACME.1.1.0"]);
    }

    #[test]
    fn custom_range_within_line() {
        let mut catalog = Catalog::default();
        let base = add_standard(&mut catalog, "1.3.0", true);
        let acme = add_customer(&mut catalog, "ACME", Some(base));
        add_custom(&mut catalog, acme, "1.0.0", true);
        add_custom(&mut catalog, acme, "1.1.0", true);
        add_custom(&mut catalog, acme, "2.0.0", true);

        let range = resolve(
            &catalog,
            ReleaseLine::Custom,
            Some(acme),
            "1.3.0-ACME.1.0.0",
            "1.3.0-ACME.2.0.0",
        )
        .expect("range");
        assert_eq!(names(&range), vec!["1.3.0-ACME.1.1.0", "1.3.0-ACME.2.0.0"]);
    }

    #[test]
    fn custom_range_scope_checks() {
        let mut catalog = Catalog::default();
        let base = add_standard(&mut catalog, "1.3.0", true);
        add_standard(&mut catalog, "1.4.0", true);
        let acme = add_customer(&mut catalog, "ACME", Some(base));
        let globex = add_customer(&mut catalog, "GLOBEX", Some(base));
        add_custom(&mut catalog, acme, "1.0.0", true);
        add_custom(&mut catalog, globex, "1.0.0", true);

        let wrong_base = resolve(
            &catalog,
            ReleaseLine::Custom,
            Some(acme),
            "1.4.0",
            "1.3.0-ACME.1.0.0",
        );
        assert!(matches!(wrong_base, Err(RangeError::ScopeMismatch { .. })));

        let other_customer = resolve(
            &catalog,
            ReleaseLine::Custom,
            Some(acme),
            "1.3.0-GLOBEX.1.0.0",
            "1.3.0-ACME.1.0.0",
        );
        assert!(matches!(other_customer, Err(RangeError::ScopeMismatch { .. })));

        let missing_customer =
            resolve(&catalog, ReleaseLine::Custom, None, "1.3.0", "1.3.0-ACME.1.0.0");
        assert!(matches!(missing_customer, Err(RangeError::ScopeMismatch { .. })));

        let standard_with_custom_to =
            resolve(&catalog, ReleaseLine::Standard, None, "1.3.0", "1.3.0-ACME.1.0.0");
        assert!(matches!(
            standard_with_custom_to,
            Err(RangeError::ScopeMismatch { .. })
        ));
    }

    #[test]
    fn custom_range_ignores_versions_on_an_older_base() {
        let mut catalog = Catalog::default();
        let old_base = add_standard(&mut catalog, "1.3.0", true);
        let new_base = add_standard(&mut catalog, "1.4.0", true);
        let acme = add_customer(&mut catalog, "ACME", Some(old_base));
        add_custom(&mut catalog, acme, "1.0.0", true);
        catalog
            .customers
            .get_mut(&acme)
            .expect("customer")
            .base_version_id = Some(new_base);
        add_custom(&mut catalog, acme, "1.0.0", true);
        add_custom(&mut catalog, acme, "1.1.0", true);

        let range = resolve(
            &catalog,
            ReleaseLine::Custom,
            Some(acme),
            "1.4.0",
            "1.4.0-ACME.1.1.0",
        )
        .expect("range");
        assert_eq!(names(&range), vec!["1.4.0-ACME.1.0.0", "1.4.0-ACME.1.1.0"]);
    }
}
