//! The `README.md` shipped at the top of every patch directory.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use patchline_types::ReleaseLine;

pub const MANIFEST_FILE: &str = "README.md";

pub const BACKUP_WARNING: &str = "Back up every database and the application directory before applying this patch. \
Scripts run in version order and are not transactional across versions.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestVersion {
    pub version: String,
    pub approved_by: Option<String>,
    pub file_count: usize,
}

#[derive(Debug, Clone)]
pub struct Manifest<'a> {
    pub patch_name: &'a str,
    pub release_line: ReleaseLine,
    pub customer: Option<&'a str>,
    pub from: &'a str,
    pub to: &'a str,
    pub created_by: &'a str,
    pub created_at: DateTime<Utc>,
    pub comment: Option<&'a str>,
    pub versions: Vec<ManifestVersion>,
    /// Top-level directories present in the patch, sorted.
    pub layout: Vec<String>,
    pub scripts: Vec<String>,
    /// Storage paths that were registered but absent at assembly time.
    pub missing: Vec<String>,
}

pub fn render_manifest(m: &Manifest<'_>) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Patch {}", m.patch_name);
    let _ = writeln!(out);
    let _ = writeln!(out, "- Release line: {}", m.release_line);
    if let Some(customer) = m.customer {
        let _ = writeln!(out, "- Customer: {customer}");
    }
    let _ = writeln!(out, "- From: {} (excluded)", m.from);
    let _ = writeln!(out, "- To: {}", m.to);
    let _ = writeln!(out, "- Created by: {}", m.created_by);
    let _ = writeln!(
        out,
        "- Created at: {}",
        m.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(comment) = m.comment.filter(|c| !c.trim().is_empty()) {
        let _ = writeln!(out, "- Comment: {}", comment.trim());
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Versions");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Version | Approved by | Files |");
    let _ = writeln!(out, "|---|---|---|");
    for v in &m.versions {
        let _ = writeln!(
            out,
            "| {} | {} | {} |",
            v.version,
            v.approved_by.as_deref().unwrap_or("-"),
            v.file_count
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Layout");
    let _ = writeln!(out);
    if m.layout.is_empty() {
        let _ = writeln!(out, "No files were copied.");
    }
    for dir in &m.layout {
        let _ = writeln!(out, "- `{dir}/`");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Scripts");
    let _ = writeln!(out);
    if m.scripts.is_empty() {
        let _ = writeln!(out, "No database scripts.");
    }
    for script in &m.scripts {
        let _ = writeln!(out, "- `{script}`");
    }

    if !m.missing.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Missing files");
        let _ = writeln!(out);
        for path in &m.missing {
            let _ = writeln!(out, "- `{path}`");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## WARNING");
    let _ = writeln!(out);
    let _ = writeln!(out, "{BACKUP_WARNING}");
    out
}
