//! Configuration file support for patchline (`.patchline.toml`).
//!
//! The file lives in the workspace root. Every field is optional; missing
//! values fall back to defaults, and command-line flags override both (see
//! [`CliOverrides`]).
//!
//! # Example
//!
//! ```
//! use patchline_config::{CliOverrides, PatchlineConfig};
//! use std::path::Path;
//!
//! let config: PatchlineConfig = toml::from_str("[patch]\ncopy_workers = 2\n").expect("parse");
//! config.validate().expect("valid");
//!
//! let settings = config
//!     .build_settings(Path::new("/srv/releases"), CliOverrides::default())
//!     .expect("settings");
//! assert_eq!(settings.copy_workers, 2);
//! assert_eq!(settings.storage_dir, Path::new("/srv/releases/storage"));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use patchline_category::{Category, SubCategory, validate_sub_category};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const CONFIG_FILE: &str = ".patchline.toml";

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

/// Where catalog files, patches and state live, relative to the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

/// Patch assembly settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchConfig {
    /// DATABASE sub-category whose script records version history.
    #[serde(default = "default_bookkeeping_sub_category")]
    pub bookkeeping_sub_category: String,

    /// Worker threads used to copy files into a patch.
    #[serde(default = "default_copy_workers")]
    pub copy_workers: usize,

    /// Upper bound on one assembly run.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_patch_timeout")]
    pub timeout: Duration,

    /// Table the bookkeeping script inserts applied versions into.
    #[serde(default = "default_history_table")]
    pub history_table: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Locks older than this are considered stale.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_lock_timeout")]
    pub timeout: Duration,
}

/// Contents of `.patchline.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchlineConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub patch: PatchConfig,
    #[serde(default)]
    pub lock: LockConfig,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("storage")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("patches")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".patchline")
}

fn default_bookkeeping_sub_category() -> String {
    "MARIADB".to_string()
}

fn default_copy_workers() -> usize {
    4
}

fn default_patch_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_history_table() -> String {
    "release_history".to_string()
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(3600)
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            output_dir: default_output_dir(),
            state_dir: default_state_dir(),
        }
    }
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            bookkeeping_sub_category: default_bookkeeping_sub_category(),
            copy_workers: default_copy_workers(),
            timeout: default_patch_timeout(),
            history_table: default_history_table(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: default_lock_timeout(),
        }
    }
}

/// Flags given on the command line. `None` means "not passed".
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub storage_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub copy_workers: Option<usize>,
    pub patch_timeout: Option<Duration>,
    pub lock_timeout: Option<Duration>,
}

/// Effective settings with every path resolved against the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub root: PathBuf,
    pub storage_dir: PathBuf,
    pub output_dir: PathBuf,
    pub state_dir: PathBuf,
    pub bookkeeping_sub_category: SubCategory,
    pub copy_workers: usize,
    pub patch_timeout: Duration,
    pub history_table: String,
    pub lock_timeout: Duration,
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl PatchlineConfig {
    /// Load `.patchline.toml` from `root`; `Ok(None)` when there is none.
    pub fn load_from_workspace(root: &Path) -> Result<Option<Self>> {
        let path = config_path(root);
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from_file(&path).map(Some)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: PatchlineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("paths.storage_dir", &self.paths.storage_dir),
            ("paths.output_dir", &self.paths.output_dir),
            ("paths.state_dir", &self.paths.state_dir),
        ] {
            if path.as_os_str().is_empty() {
                bail!("{name} cannot be empty");
            }
        }

        if self.patch.copy_workers == 0 {
            bail!("patch.copy_workers must be greater than 0");
        }
        if self.patch.timeout.is_zero() {
            bail!("patch.timeout must be greater than 0");
        }
        if !is_sql_identifier(&self.patch.history_table) {
            bail!(
                "patch.history_table must be a plain SQL identifier, got `{}`",
                self.patch.history_table
            );
        }
        validate_sub_category(Category::Database, &self.patch.bookkeeping_sub_category)
            .context("patch.bookkeeping_sub_category is invalid")?;

        if self.lock.timeout.is_zero() {
            bail!("lock.timeout must be greater than 0");
        }
        Ok(())
    }

    /// Merge CLI flags over file values and resolve paths against `root`.
    pub fn build_settings(&self, root: &Path, cli: CliOverrides) -> Result<Settings> {
        let bookkeeping_sub_category =
            validate_sub_category(Category::Database, &self.patch.bookkeeping_sub_category)
                .context("patch.bookkeeping_sub_category is invalid")?;

        let resolve = |path: PathBuf| {
            if path.is_absolute() {
                path
            } else {
                root.join(path)
            }
        };

        let settings = Settings {
            root: root.to_path_buf(),
            storage_dir: resolve(
                cli.storage_dir
                    .unwrap_or_else(|| self.paths.storage_dir.clone()),
            ),
            output_dir: resolve(cli.output_dir.unwrap_or_else(|| self.paths.output_dir.clone())),
            state_dir: resolve(cli.state_dir.unwrap_or_else(|| self.paths.state_dir.clone())),
            bookkeeping_sub_category,
            copy_workers: cli.copy_workers.unwrap_or(self.patch.copy_workers),
            patch_timeout: cli.patch_timeout.unwrap_or(self.patch.timeout),
            history_table: self.patch.history_table.clone(),
            lock_timeout: cli.lock_timeout.unwrap_or(self.lock.timeout),
        };

        if settings.copy_workers == 0 {
            bail!("copy workers must be greater than 0");
        }
        if settings.patch_timeout.is_zero() {
            bail!("patch timeout must be greater than 0");
        }
        Ok(settings)
    }

    /// Commented configuration written by `patchline init`.
    pub fn default_toml_template() -> String {
        r#"# patchline configuration file
# Place this file in the workspace root as .patchline.toml

[paths]
# Where uploaded release files are stored
storage_dir = "storage"
# Where cumulative patches are assembled
output_dir = "patches"
# Catalog, event log and lock file
state_dir = ".patchline"

[patch]
# DATABASE sub-category whose script records version history
bookkeeping_sub_category = "MARIADB"
# Worker threads used to copy files into a patch
copy_workers = 4
# Upper bound on one assembly run
timeout = "10m"
# Table the bookkeeping script inserts applied versions into
history_table = "release_history"

[lock]
# Locks older than this are considered stale
timeout = "1h"
"#
        .to_string()
    }
}

/// Name recorded as `created_by`: `PATCHLINE_USER`, then `USER`, then `unknown`.
pub fn default_user() -> String {
    ["PATCHLINE_USER", "USER"]
        .into_iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
