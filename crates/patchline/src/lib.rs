//! # Patchline
//!
//! Version lineage and cumulative patch assembly for product release catalogs.
//!
//! Patchline keeps a catalog of release versions on a standard line and on
//! per-customer custom lines, records which version came before which, and
//! builds self-contained patch directories that take an installation from one
//! version to a later one.
//!
//! ## Features
//!
//! - **Typed versions**: `1.3.0`, `1.3.0-ACME.1.0.0` and hotfixes such as
//!   `1.3.0.2` are parsed once into [`version::VersionParts`] and compared only
//!   within one release line.
//! - **Lineage**: every version records ancestry edges to the versions created
//!   before it on its line, in the same commit that creates it.
//! - **Approval gate**: a patch range is refused while any version in it is
//!   unapproved, naming every offender.
//! - **Cumulative patches**: files of every version in range are copied into a
//!   fixed layout, with one shell script per database sub-category and a
//!   `README.md` manifest.
//! - **All or nothing**: a failed, cancelled or timed-out assembly removes its
//!   output directory and never leaves a patch record behind.
//!
//! ## Pipeline
//!
//! 1. [`range::resolve`] picks the approved versions strictly after `from` up
//!    to and including `to`, from one catalog snapshot.
//! 2. [`Session::assemble_patch`] allocates the output directory, copies
//!    files, writes scripts and the manifest, then commits a
//!    [`types::PatchRecord`].
//!
//! ## Example
//!
//! ```
//! use patchline::assemble::{AssemblyOptions, PatchRequest};
//! use patchline::reporter::NullReporter;
//! use patchline::session::Session;
//! use patchline::storage::FileStorage;
//! use patchline::store::MemoryStore;
//! use patchline::types::Category;
//!
//! let td = tempfile::tempdir().expect("tempdir");
//! let store = MemoryStore::default();
//! let storage = FileStorage::new(td.path().join("storage"));
//! let mut session = Session::new(&store, &storage, "alice");
//!
//! for v in ["1.2.0", "1.3.0"] {
//!     session.create_standard_version(v, None).expect("create");
//!     session.approve_version(v).expect("approve");
//! }
//! session
//!     .add_file("1.3.0", Category::Database, Some("MARIADB"), "001.sql", b"select 1;")
//!     .expect("add file");
//!
//! let outcome = session
//!     .assemble_patch(
//!         &PatchRequest::standard("1.2.0", "1.3.0"),
//!         &AssemblyOptions::new(td.path().join("patches")),
//!         &mut NullReporter,
//!     )
//!     .expect("assemble");
//! assert_eq!(outcome.versions, vec!["1.3.0"]);
//! assert!(outcome.patch_dir.join("mariadb_patch.sh").is_file());
//! ```
//!
//! ## Modules
//!
//! - [`catalog`]: customers, versions, approval and the version tree
//! - [`files`]: release file registration and upload import
//! - [`lineage`]: ancestry edges
//! - [`range`]: cumulative range resolution
//! - [`hotfix`]: hotfix branches
//! - [`assemble`]: the patch assembly pipeline
//! - [`patches`]: persisted patch records
//!
//! ## CLI Usage
//!
//! For command-line usage, see the `patchline-cli` crate.

/// Patch assembly pipeline and its rollback guard.
pub mod assemble;

/// Customer and version registry.
pub mod catalog;

/// Typed errors of every catalog and assembly operation.
pub mod error;

/// Release file registration and upload import.
pub mod files;

/// Hotfix creation and queries.
pub mod hotfix;

/// Ancestry edges between versions of one release line.
pub mod lineage;

/// `README.md` rendering for patch directories.
pub mod manifest;

/// Patch record queries and deletion.
pub mod patches;

/// Cumulative range resolution.
pub mod range;

/// Progress and diagnostics sink.
pub mod reporter;

/// Database script rendering.
pub mod script;

/// Store, storage and actor bound together.
pub mod session;

/// Version parsing and ordering.
/// Re-exported from patchline-version microcrate.
pub use patchline_version as version;

/// File categories and patch layout.
/// Re-exported from patchline-category microcrate.
pub use patchline_category as category;

/// Shared domain types.
/// Re-exported from patchline-types microcrate.
pub use patchline_types as types;

/// Release file storage backends.
/// Re-exported from patchline-storage microcrate.
pub use patchline_storage as storage;

/// Catalog persistence.
/// Re-exported from patchline-store microcrate.
pub use patchline_store as store;

/// Append-only JSONL event log.
/// Re-exported from patchline-events microcrate.
pub use patchline_events as events;

pub use session::Session;

#[cfg(test)]
mod test_support;

/// Property-based tests for catalog invariants.
#[cfg(test)]
mod property_tests;
