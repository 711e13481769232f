//! Workspace lock held by every mutating patchline command.
//!
//! The lock is a JSON file named `lock` in the state directory. It records who
//! holds it (pid, hostname), since when, and which operation is running. It is
//! created exclusively, so two processes can never both believe they hold it,
//! and it is removed when the [`WorkspaceLock`] is dropped.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const LOCK_FILE: &str = "lock";

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    /// Command holding the lock, e.g. `patch build`.
    pub operation: String,
}

impl LockInfo {
    fn current(operation: &str) -> Self {
        Self {
            pid: std::process::id(),
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            acquired_at: Utc::now(),
            operation: operation.to_string(),
        }
    }

    /// Whether the lock was taken longer than `timeout` ago.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        let age = Utc::now() - self.acquired_at;
        age.num_seconds().max(0).unsigned_abs() > timeout.as_secs()
    }
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
    released: bool,
}

impl WorkspaceLock {
    /// Take the lock, failing if any lock file already exists.
    pub fn acquire(state_dir: &Path, operation: &str) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;

        let path = lock_path(state_dir);
        let info = LockInfo::current(operation);
        let json = serde_json::to_string_pretty(&info).context("failed to serialize lock info")?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(held_error(&path));
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to create lock file {}", path.display()));
            }
        };

        let written = file
            .write_all(json.as_bytes())
            .and_then(|()| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&path);
            return Err(e).with_context(|| format!("failed to write lock file {}", path.display()));
        }

        Ok(Self {
            path,
            released: false,
        })
    }

    /// Take the lock, replacing an existing one that is older than `timeout`
    /// or unreadable.
    pub fn acquire_with_timeout(
        state_dir: &Path,
        operation: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let path = lock_path(state_dir);
        if path.exists() {
            let replace = match read_lock_info(state_dir) {
                Ok(info) => info.is_stale(timeout),
                Err(_) => true,
            };
            if replace {
                fs::remove_file(&path).with_context(|| {
                    format!("failed to remove stale lock file {}", path.display())
                })?;
            }
        }
        Self::acquire(state_dir, operation)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to remove lock file {}", self.path.display())
                });
            }
        }
        self.released = true;
        Ok(())
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            eprintln!("[warn] {err:#}");
        }
    }
}

fn held_error(path: &Path) -> anyhow::Error {
    match read_lock_info_from_path(path) {
        Ok(info) => anyhow::anyhow!(
            "lock already held by pid {} on {} since {} (operation: {})",
            info.pid,
            info.hostname,
            info.acquired_at,
            info.operation
        ),
        Err(_) => anyhow::anyhow!("lock already held ({} exists)", path.display()),
    }
}

pub fn is_locked(state_dir: &Path) -> bool {
    lock_path(state_dir).exists()
}

pub fn read_lock_info(state_dir: &Path) -> Result<LockInfo> {
    read_lock_info_from_path(&lock_path(state_dir))
}

fn read_lock_info_from_path(path: &Path) -> Result<LockInfo> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read lock file {}", path.display()))?;
    let info: LockInfo = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse lock JSON from {}", path.display()))?;
    if info.operation.is_empty() {
        bail!("lock file {} names no operation", path.display());
    }
    Ok(info)
}

pub fn lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LOCK_FILE)
}
