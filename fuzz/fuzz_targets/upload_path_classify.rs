#![no_main]

use libfuzzer_sys::fuzz_target;
use patchline_category::classify_entry_path;

fuzz_target!(|data: &[u8]| {
    let Ok(path) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(entry) = classify_entry_path(path) {
        assert!(!entry.file_name.is_empty());
        assert!(!entry.file_name.split('/').any(|s| s == ".."));
    }
});
