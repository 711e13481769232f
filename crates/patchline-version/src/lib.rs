//! Version identity for patchline release lines.
//!
//! Three shapes of version string are understood:
//!
//! - standard: `M.m.p` (e.g. `1.3.0`)
//! - custom: `M.m.p-{customerCode}.cM.cm.cp` (e.g. `1.3.0-ACME.1.0.2`), where the
//!   leading `M.m.p` is the standard base the customer line is anchored to
//! - hotfix: either of the above with one trailing component (`1.3.0.1`,
//!   `1.3.0-ACME.1.0.2.1`)
//!
//! Ordering is only defined between versions of the same kind. Asking to compare
//! a hotfix with a non-hotfix, a standard version with a custom one, or custom
//! versions from different customers or bases is reported as a [`CompareError`]
//! rather than coerced.
//!
//! # Example
//!
//! ```
//! use std::cmp::Ordering;
//! use patchline_version::{compare, group_key, parse};
//!
//! let a = parse("1.2.0").expect("parse");
//! let b = parse("1.10.0").expect("parse");
//! assert_eq!(compare(&a, &b).expect("comparable"), Ordering::Less);
//! assert_eq!(group_key(&b), "1.10.x");
//! assert_eq!(b.to_string(), "1.10.0");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing a version string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("version string is empty")]
    Empty,

    #[error("invalid component `{component}` in version `{input}`: expected a non-negative integer")]
    InvalidComponent { input: String, component: String },

    #[error("version `{input}` has {found} numeric components in its {part} part, expected {expected}")]
    ComponentCount {
        input: String,
        part: &'static str,
        found: usize,
        expected: &'static str,
    },

    #[error("invalid customer code `{code}` in version `{input}`")]
    InvalidCustomerCode { input: String, code: String },
}

/// Errors produced when two versions have no defined relative order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompareError {
    #[error("cannot compare hotfix version {hotfix} with non-hotfix version {other}")]
    HotfixMismatch { hotfix: String, other: String },

    #[error("cannot compare standard version {standard} with custom version {custom}")]
    LineMismatch { standard: String, custom: String },

    #[error("custom versions {left} and {right} belong to different customers")]
    CustomerMismatch { left: String, right: String },

    #[error("custom versions {left} and {right} are anchored to different base versions")]
    BaseMismatch { left: String, right: String },
}

/// The customer-scoped axis of a custom version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomParts {
    customer_code: String,
    major: u32,
    minor: u32,
    patch: u32,
}

impl CustomParts {
    pub fn customer_code(&self) -> &str {
        &self.customer_code
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }
}

/// Parsed components of a version string.
///
/// Serialized as its canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionParts {
    major: u32,
    minor: u32,
    patch: u32,
    custom: Option<CustomParts>,
    hotfix: Option<u32>,
}

impl VersionParts {
    /// A standard `M.m.p` version.
    pub fn standard(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            custom: None,
            hotfix: None,
        }
    }

    /// A custom version anchored to the standard base `base`.
    ///
    /// `base` must itself be a plain standard version; its hotfix component, if
    /// any, is dropped.
    pub fn custom(
        base: &VersionParts,
        customer_code: &str,
        major: u32,
        minor: u32,
        patch: u32,
    ) -> Result<Self, ParseError> {
        if !is_valid_customer_code(customer_code) {
            return Err(ParseError::InvalidCustomerCode {
                input: customer_code.to_string(),
                code: customer_code.to_string(),
            });
        }
        Ok(Self {
            major: base.major,
            minor: base.minor,
            patch: base.patch,
            custom: Some(CustomParts {
                customer_code: customer_code.to_string(),
                major,
                minor,
                patch,
            }),
            hotfix: None,
        })
    }

    /// The same version with hotfix component `number`.
    pub fn with_hotfix(&self, number: u32) -> Self {
        Self {
            hotfix: Some(number),
            ..self.clone()
        }
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }

    pub fn custom_parts(&self) -> Option<&CustomParts> {
        self.custom.as_ref()
    }

    pub fn customer_code(&self) -> Option<&str> {
        self.custom.as_ref().map(|c| c.customer_code.as_str())
    }

    pub fn hotfix(&self) -> Option<u32> {
        self.hotfix
    }

    pub fn is_hotfix(&self) -> bool {
        self.hotfix.is_some()
    }

    pub fn is_custom(&self) -> bool {
        self.custom.is_some()
    }

    /// The standard `M.m.p` this version is anchored to (itself, for a plain
    /// standard version).
    pub fn base(&self) -> VersionParts {
        VersionParts::standard(self.major, self.minor, self.patch)
    }

    /// Flattened numeric tuple used for ordering within one scope.
    fn ordinal(&self) -> [u32; 7] {
        let (cm, cn, cp) = self
            .custom
            .as_ref()
            .map(|c| (c.major, c.minor, c.patch))
            .unwrap_or_default();
        [
            self.major,
            self.minor,
            self.patch,
            cm,
            cn,
            cp,
            self.hotfix.unwrap_or_default(),
        ]
    }
}

impl fmt::Display for VersionParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(custom) = &self.custom {
            write!(
                f,
                "-{}.{}.{}.{}",
                custom.customer_code, custom.major, custom.minor, custom.patch
            )?;
        }
        if let Some(hotfix) = self.hotfix {
            write!(f, ".{hotfix}")?;
        }
        Ok(())
    }
}

impl FromStr for VersionParts {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl TryFrom<String> for VersionParts {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse(&value)
    }
}

impl From<VersionParts> for String {
    fn from(value: VersionParts) -> Self {
        value.to_string()
    }
}

/// Customer codes are ASCII alphanumerics and underscores.
pub fn is_valid_customer_code(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Parse a version string in any of the supported shapes.
pub fn parse(input: &str) -> Result<VersionParts, ParseError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let (base, custom) = match text.split_once('-') {
        Some((base, custom)) => (base, Some(custom)),
        None => (text, None),
    };

    let base_nums = parse_components(text, base)?;

    let Some(custom) = custom else {
        return match base_nums.as_slice() {
            [major, minor, patch] => Ok(VersionParts::standard(*major, *minor, *patch)),
            [major, minor, patch, hotfix] => {
                Ok(VersionParts::standard(*major, *minor, *patch).with_hotfix(*hotfix))
            }
            other => Err(ParseError::ComponentCount {
                input: text.to_string(),
                part: "standard",
                found: other.len(),
                expected: "3, or 4 for a hotfix",
            }),
        };
    };

    let [major, minor, patch] = base_nums.as_slice() else {
        return Err(ParseError::ComponentCount {
            input: text.to_string(),
            part: "base",
            found: base_nums.len(),
            expected: "3",
        });
    };

    let (code, rest) = custom.split_once('.').unwrap_or((custom, ""));
    if !is_valid_customer_code(code) {
        return Err(ParseError::InvalidCustomerCode {
            input: text.to_string(),
            code: code.to_string(),
        });
    }
    if rest.is_empty() {
        return Err(ParseError::ComponentCount {
            input: text.to_string(),
            part: "custom",
            found: 0,
            expected: "3, or 4 for a hotfix",
        });
    }

    let custom_nums = parse_components(text, rest)?;
    let base = VersionParts::standard(*major, *minor, *patch);
    let (cm, cn, cp, hotfix) = match custom_nums.as_slice() {
        [cm, cn, cp] => (*cm, *cn, *cp, None),
        [cm, cn, cp, h] => (*cm, *cn, *cp, Some(*h)),
        other => {
            return Err(ParseError::ComponentCount {
                input: text.to_string(),
                part: "custom",
                found: other.len(),
                expected: "3, or 4 for a hotfix",
            });
        }
    };

    let parts = VersionParts::custom(&base, code, cm, cn, cp)?;
    Ok(match hotfix {
        Some(h) => parts.with_hotfix(h),
        None => parts,
    })
}

fn parse_components(input: &str, text: &str) -> Result<Vec<u32>, ParseError> {
    text.split('.')
        .map(|component| parse_component(input, component))
        .collect()
}

fn parse_component(input: &str, component: &str) -> Result<u32, ParseError> {
    let invalid = || ParseError::InvalidComponent {
        input: input.to_string(),
        component: component.to_string(),
    };
    // `u32::from_str` accepts a leading `+`; only bare digits are allowed here.
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    component.parse::<u32>().map_err(|_| invalid())
}

/// Canonical display form; the inverse of [`parse`].
pub fn format(parts: &VersionParts) -> String {
    parts.to_string()
}

/// Check that `a` and `b` live on the same ordering axis.
pub fn check_comparable(a: &VersionParts, b: &VersionParts) -> Result<(), CompareError> {
    if a.is_hotfix() != b.is_hotfix() {
        let (hotfix, other) = if a.is_hotfix() { (a, b) } else { (b, a) };
        return Err(CompareError::HotfixMismatch {
            hotfix: hotfix.to_string(),
            other: other.to_string(),
        });
    }

    match (&a.custom, &b.custom) {
        (None, None) => Ok(()),
        (Some(_), None) => Err(CompareError::LineMismatch {
            standard: b.to_string(),
            custom: a.to_string(),
        }),
        (None, Some(_)) => Err(CompareError::LineMismatch {
            standard: a.to_string(),
            custom: b.to_string(),
        }),
        (Some(ca), Some(cb)) => {
            if ca.customer_code != cb.customer_code {
                Err(CompareError::CustomerMismatch {
                    left: a.to_string(),
                    right: b.to_string(),
                })
            } else if a.base() != b.base() {
                Err(CompareError::BaseMismatch {
                    left: a.to_string(),
                    right: b.to_string(),
                })
            } else {
                Ok(())
            }
        }
    }
}

/// Compare two versions of the same kind.
pub fn compare(a: &VersionParts, b: &VersionParts) -> Result<Ordering, CompareError> {
    check_comparable(a, b)?;
    Ok(a.ordinal().cmp(&b.ordinal()))
}

/// Sort `items` ascending by version.
///
/// Every item must be comparable with every other; the slice is left untouched
/// when it is not.
pub fn sort_by_version<T>(
    items: &mut [T],
    parts: impl Fn(&T) -> &VersionParts,
) -> Result<(), CompareError> {
    if let Some((first, rest)) = items.split_first() {
        let first = parts(first);
        for item in rest {
            check_comparable(first, parts(item))?;
        }
    }
    items.sort_by_key(|item| parts(item).ordinal());
    Ok(())
}

/// Display bucket for a version: `M.m.x`.
pub fn group_key(parts: &VersionParts) -> String {
    format!("{}.{}.x", parts.major, parts.minor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> VersionParts {
        parse(s).expect("valid version")
    }

    #[test]
    fn parses_standard_version() {
        let p = v("1.2.3");
        assert_eq!((p.major(), p.minor(), p.patch()), (1, 2, 3));
        assert!(!p.is_custom());
        assert!(!p.is_hotfix());
    }

    #[test]
    fn parses_standard_hotfix() {
        let p = v("1.2.3.4");
        assert_eq!(p.hotfix(), Some(4));
        assert_eq!(p.base(), v("1.2.3"));
    }

    #[test]
    fn parses_custom_version() {
        let p = v("1.3.0-ACME.2.0.1");
        let custom = p.custom_parts().expect("custom");
        assert_eq!(custom.customer_code(), "ACME");
        assert_eq!((custom.major(), custom.minor(), custom.patch()), (2, 0, 1));
        assert_eq!(p.base(), v("1.3.0"));
        assert!(!p.is_hotfix());
    }

    #[test]
    fn parses_custom_hotfix() {
        let p = v("1.3.0-ACME.2.0.1.3");
        assert_eq!(p.hotfix(), Some(3));
        assert_eq!(p.customer_code(), Some("ACME"));
    }

    #[test]
    fn rejects_negative_and_non_numeric_components() {
        for bad in ["-1.0.0", "1.-2.0", "1.a.0", "1.+2.0", "1..0", "1.0.", " "] {
            assert!(parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn rejects_wrong_component_counts() {
        assert!(matches!(
            parse("1.2"),
            Err(ParseError::ComponentCount { found: 2, .. })
        ));
        assert!(matches!(
            parse("1.2.3.4.5"),
            Err(ParseError::ComponentCount { found: 5, .. })
        ));
        assert!(matches!(
            parse("1.2.3.4-ACME.1.0.0"),
            Err(ParseError::ComponentCount { part: "base", .. })
        ));
        assert!(matches!(
            parse("1.2.3-ACME"),
            Err(ParseError::ComponentCount { part: "custom", .. })
        ));
    }

    #[test]
    fn rejects_invalid_customer_code() {
        assert!(matches!(
            parse("1.2.3-AC ME.1.0.0"),
            Err(ParseError::InvalidCustomerCode { .. })
        ));
        assert!(matches!(
            parse("1.2.3-.1.0.0"),
            Err(ParseError::InvalidCustomerCode { .. })
        ));
    }

    #[test]
    fn rejects_overflowing_component() {
        assert!(matches!(
            parse("99999999999.0.0"),
            Err(ParseError::InvalidComponent { .. })
        ));
    }

    #[test]
    fn compare_is_numeric_not_lexical() {
        assert_eq!(compare(&v("1.9.0"), &v("1.10.0")), Ok(Ordering::Less));
        assert_eq!(compare(&v("2.0.0"), &v("1.99.99")), Ok(Ordering::Greater));
        assert_eq!(compare(&v("1.0.0"), &v("1.0.0")), Ok(Ordering::Equal));
    }

    #[test]
    fn compare_custom_uses_custom_axis() {
        assert_eq!(
            compare(&v("1.3.0-ACME.1.2.0"), &v("1.3.0-ACME.1.10.0")),
            Ok(Ordering::Less)
        );
    }

    #[test]
    fn compare_refuses_mixed_kinds() {
        assert!(matches!(
            compare(&v("1.1.0"), &v("1.1.0.1")),
            Err(CompareError::HotfixMismatch { .. })
        ));
        assert!(matches!(
            compare(&v("1.1.0"), &v("1.1.0-ACME.1.0.0")),
            Err(CompareError::LineMismatch { .. })
        ));
        assert!(matches!(
            compare(&v("1.1.0-ACME.1.0.0"), &v("1.1.0-BETA.1.0.0")),
            Err(CompareError::CustomerMismatch { .. })
        ));
        assert!(matches!(
            compare(&v("1.1.0-ACME.1.0.0"), &v("1.2.0-ACME.1.0.0")),
            Err(CompareError::BaseMismatch { .. })
        ));
    }

    #[test]
    fn hotfixes_compare_among_themselves() {
        assert_eq!(compare(&v("1.1.0.1"), &v("1.1.0.2")), Ok(Ordering::Less));
        assert_eq!(compare(&v("1.1.0.9"), &v("1.2.0.1")), Ok(Ordering::Less));
    }

    #[test]
    fn sort_by_version_orders_and_rejects_mixed_sets() {
        let mut items = vec![v("1.10.0"), v("1.2.0"), v("1.9.3")];
        sort_by_version(&mut items, |p| p).expect("sort");
        let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["1.2.0", "1.9.3", "1.10.0"]);

        let mut mixed = vec![v("1.2.0"), v("1.2.0.1")];
        assert!(sort_by_version(&mut mixed, |p| p).is_err());
        assert_eq!(mixed[0], v("1.2.0"));
    }

    #[test]
    fn group_key_buckets_by_major_minor() {
        assert_eq!(group_key(&v("3.4.5")), "3.4.x");
        assert_eq!(group_key(&v("3.4.5-ACME.1.0.0")), "3.4.x");
        assert_eq!(group_key(&v("3.4.5.2")), "3.4.x");
    }

    #[test]
    fn serializes_as_canonical_string() {
        let json = serde_json::to_string(&v("1.3.0-ACME.2.0.1")).expect("serialize");
        assert_eq!(json, "\"1.3.0-ACME.2.0.1\"");
        let back: VersionParts = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, v("1.3.0-ACME.2.0.1"));
        assert!(serde_json::from_str::<VersionParts>("\"1.x.0\"").is_err());
    }

    #[test]
    fn custom_constructor_validates_code() {
        assert!(VersionParts::custom(&v("1.0.0"), "bad-code", 1, 0, 0).is_err());
        let p = VersionParts::custom(&v("1.0.0"), "ACME", 1, 0, 0).expect("custom");
        assert_eq!(p.to_string(), "1.0.0-ACME.1.0.0");
    }

    fn parts_strategy() -> impl Strategy<Value = VersionParts> {
        (
            0u32..50,
            0u32..50,
            0u32..50,
            prop::option::of(("[A-Z][A-Z0-9_]{0,7}", 0u32..20, 0u32..20, 0u32..20)),
            prop::option::of(1u32..20),
        )
            .prop_map(|(major, minor, patch, custom, hotfix)| {
                let base = VersionParts::standard(major, minor, patch);
                let parts = match custom {
                    Some((code, cm, cn, cp)) => {
                        VersionParts::custom(&base, &code, cm, cn, cp).expect("valid code")
                    }
                    None => base,
                };
                match hotfix {
                    Some(h) => parts.with_hotfix(h),
                    None => parts,
                }
            })
    }

    fn standard_strategy() -> impl Strategy<Value = VersionParts> {
        (0u32..10, 0u32..10, 0u32..10).prop_map(|(a, b, c)| VersionParts::standard(a, b, c))
    }

    proptest! {
        #[test]
        fn parse_inverts_format(parts in parts_strategy()) {
            let text = format(&parts);
            prop_assert_eq!(parse(&text), Ok(parts));
        }

        #[test]
        fn compare_is_antisymmetric(a in standard_strategy(), b in standard_strategy()) {
            let ab = compare(&a, &b).expect("comparable");
            let ba = compare(&b, &a).expect("comparable");
            prop_assert_eq!(ab, ba.reverse());
        }

        #[test]
        fn compare_is_transitive(
            a in standard_strategy(),
            b in standard_strategy(),
            c in standard_strategy(),
        ) {
            let ab = compare(&a, &b).expect("comparable");
            let bc = compare(&b, &c).expect("comparable");
            if ab != Ordering::Greater && bc != Ordering::Greater {
                prop_assert_ne!(compare(&a, &c).expect("comparable"), Ordering::Greater);
            }
        }

        #[test]
        fn sorting_is_idempotent(mut items in prop::collection::vec(standard_strategy(), 0..20)) {
            sort_by_version(&mut items, |p| p).expect("sort");
            let once = items.clone();
            sort_by_version(&mut items, |p| p).expect("sort");
            prop_assert_eq!(once, items);
        }
    }
}
