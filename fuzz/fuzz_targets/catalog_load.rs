#![no_main]

use std::fs;

use libfuzzer_sys::fuzz_target;
use patchline_store::{CATALOG_FILE, CatalogStore, JsonFileStore};
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    if fs::write(td.path().join(CATALOG_FILE), data).is_ok() {
        let store = JsonFileStore::new(td.path().to_path_buf());
        let _ = store.snapshot();
    }
});
