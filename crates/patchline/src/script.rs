//! Generation of the per-sub-category `{sub}_patch.sh` database scripts.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use patchline_category::{KnownSubCategory, SubCategory};

/// Files of one version, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptVersion {
    pub version: String,
    pub files: Vec<String>,
}

/// Everything needed to render one database script.
#[derive(Debug, Clone)]
pub struct ScriptPlan<'a> {
    pub sub_category: &'a SubCategory,
    pub from: &'a str,
    pub to: &'a str,
    /// Every version of the range in ascending order, including those
    /// without files for this sub-category.
    pub versions: Vec<ScriptVersion>,
    /// History table to record each applied version in; set only for the
    /// bookkeeping script.
    pub history_table: Option<&'a str>,
}

impl ScriptPlan<'_> {
    pub fn is_empty(&self) -> bool {
        self.versions.iter().all(|v| v.files.is_empty())
    }
}

pub fn script_file_name(sub_category: &SubCategory) -> String {
    format!("{}_patch.sh", sub_category.dir_name())
}

/// Quote `value` for a POSIX shell.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn env_name(sub_category: &SubCategory) -> String {
    sub_category
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Client command the script pipes SQL into.
fn runner_line(sub_category: &SubCategory) -> String {
    match sub_category.known() {
        Some(KnownSubCategory::MariaDb) => r#"RUNNER="mysql ${MARIADB_ARGS:-}""#.to_string(),
        Some(KnownSubCategory::CrateDb) => r#"RUNNER="crash ${CRATEDB_ARGS:-}""#.to_string(),
        None => {
            let var = format!("PATCH_RUNNER_{}", env_name(sub_category));
            format!(r#"RUNNER="${{{var}:?set {var} to the client command for {sub_category}}}""#)
        }
    }
}

pub fn render_script(plan: &ScriptPlan<'_>) -> String {
    let sub = plan.sub_category;
    let mut out = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(out, "#!/bin/bash");
    let _ = writeln!(out, "# {sub} cumulative patch: {} -> {}", plan.from, plan.to);
    let _ = writeln!(out, "set -euo pipefail");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        r#"SCRIPT_DIR="$(cd "$(dirname "${{BASH_SOURCE[0]}}")" && pwd)""#
    );
    let _ = writeln!(out, r#"SQL_DIR="${{SCRIPT_DIR}}/database/{}""#, sub.dir_name());
    let _ = writeln!(out, "{}", runner_line(sub));
    let _ = writeln!(out);

    let _ = writeln!(out, "VERSION_METADATA=(");
    for version in &plan.versions {
        let entry = format!("{}|{}", version.version, version.files.join(","));
        let _ = writeln!(out, "  {}", quote(&entry));
    }
    let _ = writeln!(out, ")");
    let _ = writeln!(out);

    let _ = writeln!(out, "run_sql() {{");
    let _ = writeln!(out, r#"  echo "[$1] $2""#);
    let _ = writeln!(out, r#"  ${{RUNNER}} < "${{SQL_DIR}}/$1/$2""#);
    let _ = writeln!(out, "}}");
    if let Some(table) = plan.history_table {
        let _ = writeln!(out);
        let _ = writeln!(out, "record_version() {{");
        let _ = writeln!(
            out,
            r#"  echo "INSERT INTO {table} (version, applied_at) VALUES ('$1', CURRENT_TIMESTAMP);" | ${{RUNNER}}"#
        );
        let _ = writeln!(out, "}}");
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        r#"echo "Applying ${{#VERSION_METADATA[@]}} version(s) to {sub}""#
    );

    for version in &plan.versions {
        let _ = writeln!(out);
        if version.files.is_empty() && plan.history_table.is_none() {
            let _ = writeln!(out, "# {} (no {sub} changes)", version.version);
            continue;
        }
        let _ = writeln!(out, "# {}", version.version);
        let quoted_version = quote(&version.version);
        for file in &version.files {
            let _ = writeln!(out, "run_sql {quoted_version} {}", quote(file));
        }
        if plan.history_table.is_some() {
            let _ = writeln!(out, "record_version {quoted_version}");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, r#"echo "{sub} patch applied: {} -> {}""#, plan.from, plan.to);
    out
}

/// Render `plan` into `dir` and mark it executable.
pub fn write_script(dir: &Path, plan: &ScriptPlan<'_>) -> io::Result<PathBuf> {
    let path = dir.join(script_file_name(plan.sub_category));
    fs::write(&path, render_script(plan))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = fs::metadata(&path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms)?;
    }

    Ok(path)
}
