//! Storage backends for patchline release files.
//!
//! This crate provides the [`StorageBackend`] trait consumed by the catalog and
//! the patch assembler, and a filesystem implementation ([`FileStorage`]).
//! Paths handed to a backend are always relative to its root; absolute paths and
//! `..` segments are rejected.
//!
//! # Example
//!
//! ```
//! use patchline_storage::{FileStorage, StorageBackend, checksum};
//!
//! let td = tempfile::tempdir().expect("tempdir");
//! let storage = FileStorage::new(td.path().to_path_buf());
//!
//! storage.save("versions/1.0.0/a.sql", b"select 1;").expect("save");
//! let data = storage.read("versions/1.0.0/a.sql").expect("read");
//! assert_eq!(data, b"select 1;");
//! assert_eq!(checksum(&data).len(), 64);
//!
//! assert!(storage.read("missing.sql").unwrap_err().is_not_found());
//! ```

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage object not found: {0}")]
    NotFound(String),

    #[error("invalid storage path `{0}`: must be relative without `..` segments")]
    InvalidPath(String),

    #[error("storage I/O failed for {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    fn io(path: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Io {
                path: path.to_string(),
                source,
            }
        }
    }
}

/// Hex-encoded SHA-256 digest of `data`.
pub fn checksum(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(digest)
}

/// Storage of individual release files, addressed by relative path.
pub trait StorageBackend: Send + Sync {
    /// Write `data` at `path`, creating parent directories as needed.
    fn save(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Read the bytes at `path`; [`StorageError::NotFound`] when absent.
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Delete the object at `path`. Deleting a missing object is not an error.
    fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Move the object at `from` to `to`, replacing any object already there.
    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError>;

    /// Delete everything stored below `prefix`.
    fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError>;

    /// All object paths below `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Where `path` lives on the local filesystem.
    fn absolute_path(&self, path: &str) -> Result<PathBuf, StorageError>;

    fn checksum(&self, data: &[u8]) -> String {
        checksum(data)
    }

    /// Copy the object at `path` to a destination file outside the storage.
    fn copy_to(&self, path: &str, dest: &Path) -> Result<u64, StorageError> {
        let data = self.read(path)?;
        let dest_display = dest.display().to_string();
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        fs::write(dest, &data).map_err(|e| StorageError::Io {
            path: dest_display,
            source: e,
        })?;
        Ok(data.len() as u64)
    }
}

/// Filesystem-based storage backend rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Path to the storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let valid = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !valid {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl StorageBackend for FileStorage {
    fn save(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let full_path = self.resolve(path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(path, e))?;
        }
        // Write to a sibling temp file first so readers never see a torn object.
        let tmp_path = full_path.with_extension("partial");
        fs::write(&tmp_path, data).map_err(|e| StorageError::io(path, e))?;
        fs::rename(&tmp_path, &full_path).map_err(|e| StorageError::io(path, e))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full_path = self.resolve(path)?;
        fs::read(&full_path).map_err(|e| StorageError::io(path, e))
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.resolve(path)?.is_file())
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full_path = self.resolve(path)?;
        match fs::remove_file(&full_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let source = self.resolve(from)?;
        let dest = self.resolve(to)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(to, e))?;
        }
        fs::rename(&source, &dest).map_err(|e| StorageError::io(from, e))
    }

    fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        let full_path = self.resolve(prefix)?;
        match fs::remove_dir_all(&full_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(prefix, e)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let base = self.resolve(prefix)?;
        let mut results = Vec::new();
        if !base.exists() {
            return Ok(results);
        }

        fn collect_files(dir: &Path, root: &Path, results: &mut Vec<String>) -> io::Result<()> {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    collect_files(&path, root, results)?;
                } else if let Ok(relative) = path.strip_prefix(root) {
                    results.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
            Ok(())
        }

        collect_files(&base, &self.root, &mut results).map_err(|e| StorageError::io(prefix, e))?;
        results.sort();
        Ok(results)
    }

    fn absolute_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        self.resolve(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn save_read_and_exists() {
        let td = tempdir().expect("tempdir");
        let storage = FileStorage::new(td.path().to_path_buf());

        storage
            .save("versions/1.0.0/database/MARIADB/001.sql", b"create table t;")
            .expect("save");
        assert!(
            storage
                .exists("versions/1.0.0/database/MARIADB/001.sql")
                .expect("exists")
        );
        assert_eq!(
            storage
                .read("versions/1.0.0/database/MARIADB/001.sql")
                .expect("read"),
            b"create table t;"
        );
        assert!(!storage.exists("versions/1.0.0/other.sql").expect("exists"));
    }

    #[test]
    fn missing_object_reports_not_found() {
        let td = tempdir().expect("tempdir");
        let storage = FileStorage::new(td.path().to_path_buf());

        let err = storage.read("nope.sql").unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(
            storage.copy_to("nope.sql", &td.path().join("out/nope.sql")),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn rejects_escaping_paths() {
        let td = tempdir().expect("tempdir");
        let storage = FileStorage::new(td.path().join("root"));

        for bad in ["", "../x", "a/../../x", "/etc/passwd"] {
            assert!(
                matches!(storage.read(bad), Err(StorageError::InvalidPath(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn delete_is_idempotent() {
        let td = tempdir().expect("tempdir");
        let storage = FileStorage::new(td.path().to_path_buf());

        storage.save("a.txt", b"a").expect("save");
        storage.delete("a.txt").expect("delete");
        storage.delete("a.txt").expect("delete again");
        assert!(!storage.exists("a.txt").expect("exists"));
    }

    #[test]
    fn rename_moves_object_into_new_directory() {
        let td = tempdir().expect("tempdir");
        let storage = FileStorage::new(td.path().to_path_buf());

        storage.save("staging/1/0", b"bytes").expect("save");
        storage
            .rename("staging/1/0", "versions/1.0.0/web/app.js")
            .expect("rename");
        assert!(!storage.exists("staging/1/0").expect("exists"));
        assert_eq!(
            storage.read("versions/1.0.0/web/app.js").expect("read"),
            b"bytes"
        );
        assert!(storage.rename("staging/1/0", "x").unwrap_err().is_not_found());
    }

    #[test]
    fn delete_prefix_removes_subtree_and_list_is_sorted() {
        let td = tempdir().expect("tempdir");
        let storage = FileStorage::new(td.path().to_path_buf());

        storage.save("v/1.0.0/b.sql", b"b").expect("save");
        storage.save("v/1.0.0/a.sql", b"a").expect("save");
        storage.save("v/1.1.0/c.sql", b"c").expect("save");

        assert_eq!(
            storage.list("v/1.0.0").expect("list"),
            vec!["v/1.0.0/a.sql".to_string(), "v/1.0.0/b.sql".to_string()]
        );

        storage.delete_prefix("v/1.0.0").expect("delete prefix");
        assert_eq!(
            storage.list("v").expect("list"),
            vec!["v/1.1.0/c.sql".to_string()]
        );
        storage.delete_prefix("v/9.9.9").expect("missing prefix is fine");
    }

    #[test]
    fn copy_to_writes_destination() {
        let td = tempdir().expect("tempdir");
        let storage = FileStorage::new(td.path().join("store"));
        storage.save("x/y.bin", &[1, 2, 3]).expect("save");

        let dest = td.path().join("out/deep/y.bin");
        let written = storage.copy_to("x/y.bin", &dest).expect("copy");
        assert_eq!(written, 3);
        assert_eq!(std::fs::read(dest).expect("read"), vec![1, 2, 3]);
    }

    #[test]
    fn checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    proptest! {
        #[test]
        fn checksum_is_stable_and_hex(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let a = checksum(&data);
            prop_assert_eq!(a.len(), 64);
            prop_assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
            prop_assert_eq!(a, checksum(&data));
        }
    }
}
