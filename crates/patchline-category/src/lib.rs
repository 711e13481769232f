//! File categorization for patchline release files.
//!
//! Every release file belongs to one [`Category`]. DATABASE and ENGINE files
//! additionally carry a [`SubCategory`] naming the runtime they target. A small
//! set of runtimes is known ([`KnownSubCategory`]); their codes are
//! case-sensitive and must be supplied upper-cased. Anything else is accepted
//! verbatim as a user-defined sub-category.
//!
//! The layout of a cumulative patch is decided here as well:
//!
//! | category | target path                                     |
//! |----------|-------------------------------------------------|
//! | DATABASE | `database/{sub-category lower}/{version}/{file}` |
//! | WEB      | `web/{version}/{file}`                          |
//! | ENGINE   | `engine/{version}/{file}`                       |
//! | other    | `etc/{file}`                                    |
//!
//! INSTALL files never make it into a patch ([`is_excluded_from_patch`]).

use std::fmt;
use std::str::FromStr;

use patchline_version::VersionParts;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CategoryError {
    #[error("unrecognized category `{0}` (expected database, web, engine or install)")]
    Unrecognized(String),

    #[error("sub-category `{given}` must be written as `{expected}`")]
    NotUpperCase { given: String, expected: String },

    #[error("sub-category must not be empty")]
    EmptySubCategory,

    #[error("sub-category `{0}` contains a path separator or traversal segment")]
    InvalidSubCategory(String),

    #[error("{category} files require a sub-category (`{path}`)")]
    MissingSubCategory { category: Category, path: String },

    #[error("invalid upload entry path `{0}`")]
    InvalidEntryPath(String),
}

/// Top-level classification of a release file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Database,
    Web,
    Engine,
    Install,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Database,
        Category::Web,
        Category::Engine,
        Category::Install,
    ];

    /// Lower-cased directory name used in storage and patch layouts.
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Database => "database",
            Category::Web => "web",
            Category::Engine => "engine",
            Category::Install => "install",
        }
    }

    /// Whether sub-categories of this category come from the controlled vocabulary.
    pub fn has_controlled_vocabulary(self) -> bool {
        matches!(self, Category::Database | Category::Engine)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Database => write!(f, "DATABASE"),
            Category::Web => write!(f, "WEB"),
            Category::Engine => write!(f, "ENGINE"),
            Category::Install => write!(f, "INSTALL"),
        }
    }
}

impl FromStr for Category {
    type Err = CategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        category_of(s).ok_or_else(|| CategoryError::Unrecognized(s.to_string()))
    }
}

/// Runtimes with a fixed, upper-case code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KnownSubCategory {
    MariaDb,
    CrateDb,
}

impl KnownSubCategory {
    pub const ALL: [KnownSubCategory; 2] = [KnownSubCategory::MariaDb, KnownSubCategory::CrateDb];

    pub fn code(self) -> &'static str {
        match self {
            KnownSubCategory::MariaDb => "MARIADB",
            KnownSubCategory::CrateDb => "CRATEDB",
        }
    }

    /// Look up an exact (upper-case) code.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }
}

/// Sub-category of a release file.
///
/// Serialized as its raw string; an exact known code deserializes to
/// [`SubCategory::Known`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubCategory {
    Known(KnownSubCategory),
    UserDefined(String),
}

impl SubCategory {
    pub fn as_str(&self) -> &str {
        match self {
            SubCategory::Known(k) => k.code(),
            SubCategory::UserDefined(raw) => raw,
        }
    }

    /// Lower-cased directory name used in patch layouts and script names.
    pub fn dir_name(&self) -> String {
        self.as_str().to_lowercase()
    }

    pub fn known(&self) -> Option<KnownSubCategory> {
        match self {
            SubCategory::Known(k) => Some(*k),
            SubCategory::UserDefined(_) => None,
        }
    }
}

impl fmt::Display for SubCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for SubCategory {
    fn from(value: String) -> Self {
        match KnownSubCategory::from_code(&value) {
            Some(known) => SubCategory::Known(known),
            None => SubCategory::UserDefined(value),
        }
    }
}

impl From<SubCategory> for String {
    fn from(value: SubCategory) -> Self {
        match value {
            SubCategory::Known(k) => k.code().to_string(),
            SubCategory::UserDefined(raw) => raw,
        }
    }
}

/// Map an upload path segment (e.g. `database`, `WEB`) to its category.
pub fn category_of(segment: &str) -> Option<Category> {
    Category::ALL
        .into_iter()
        .find(|c| c.dir_name().eq_ignore_ascii_case(segment.trim()))
}

/// INSTALL files are shipped with full installs only, never with patches.
pub fn is_excluded_from_patch(category: Category) -> bool {
    matches!(category, Category::Install)
}

/// Validate a raw sub-category for `category`.
///
/// For DATABASE and ENGINE, a value whose upper-cased form is a known code must
/// already be upper-cased (`mariadb` is rejected, `MARIADB` accepted). Any other
/// value is taken verbatim as user-defined.
pub fn validate_sub_category(category: Category, raw: &str) -> Result<SubCategory, CategoryError> {
    if raw.trim().is_empty() {
        return Err(CategoryError::EmptySubCategory);
    }
    if raw.contains(['/', '\\']) || raw == "." || raw == ".." {
        return Err(CategoryError::InvalidSubCategory(raw.to_string()));
    }

    if category.has_controlled_vocabulary() {
        let upper = raw.to_ascii_uppercase();
        if let Some(known) = KnownSubCategory::from_code(&upper) {
            if raw != upper {
                return Err(CategoryError::NotUpperCase {
                    given: raw.to_string(),
                    expected: upper,
                });
            }
            return Ok(SubCategory::Known(known));
        }
    }

    Ok(SubCategory::UserDefined(raw.to_string()))
}

/// Relative path of a file inside a cumulative patch directory.
pub fn target_path(
    category: Category,
    sub_category: Option<&SubCategory>,
    version: &VersionParts,
    file_name: &str,
) -> String {
    match (category, sub_category) {
        (Category::Database, Some(sub)) => {
            format!("database/{}/{version}/{file_name}", sub.dir_name())
        }
        (Category::Web | Category::Engine, _) => {
            format!("{}/{version}/{file_name}", category.dir_name())
        }
        _ => format!("etc/{file_name}"),
    }
}

/// One entry of an extracted upload, split into its categorized parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEntry {
    pub category: Category,
    pub sub_category: Option<SubCategory>,
    /// Path below the category (and sub-category) directory; may contain `/`.
    pub file_name: String,
}

/// Split an upload entry path such as `database/MARIADB/001_schema.sql`.
///
/// Shapes accepted: `{category}/{file}` and `{category}/{sub-category}/{path...}`.
/// DATABASE entries must name a sub-category.
pub fn classify_entry_path(path: &str) -> Result<ClassifiedEntry, CategoryError> {
    let normalized = path.replace('\\', "/");
    let trimmed = normalized.trim_start_matches("./").trim_matches('/');
    let segments: Vec<&str> = trimmed.split('/').collect();

    if segments
        .iter()
        .any(|s| s.is_empty() || *s == "." || *s == "..")
    {
        return Err(CategoryError::InvalidEntryPath(path.to_string()));
    }

    let (first, rest) = match segments.split_first() {
        Some((first, rest)) if !rest.is_empty() => (*first, rest),
        _ => return Err(CategoryError::InvalidEntryPath(path.to_string())),
    };

    let category =
        category_of(first).ok_or_else(|| CategoryError::Unrecognized(first.to_string()))?;

    match rest {
        [file] => {
            if category == Category::Database {
                return Err(CategoryError::MissingSubCategory {
                    category,
                    path: path.to_string(),
                });
            }
            Ok(ClassifiedEntry {
                category,
                sub_category: None,
                file_name: (*file).to_string(),
            })
        }
        [sub, tail @ ..] => Ok(ClassifiedEntry {
            category,
            sub_category: Some(validate_sub_category(category, sub)?),
            file_name: tail.join("/"),
        }),
        [] => Err(CategoryError::InvalidEntryPath(path.to_string())),
    }
}
