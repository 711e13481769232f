#![no_main]

use libfuzzer_sys::fuzz_target;
use patchline_version::{compare, format, parse};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(parts) = parse(input) {
        let canonical = format(&parts);
        let reparsed = parse(&canonical).expect("canonical form must parse");
        assert_eq!(reparsed, parts);
        assert_eq!(
            compare(&parts, &reparsed).expect("comparable"),
            std::cmp::Ordering::Equal
        );
    }
});
