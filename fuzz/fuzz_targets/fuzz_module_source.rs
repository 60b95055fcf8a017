//! Fuzz target for module source strings and version constraints.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_module_source
//! ```

#![no_main]

use iacguard_modules::{ModuleSource, VersionConstraint, select_version};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = ModuleSource::parse(text);

        // Split into a constraint and candidate versions.
        let mut parts = text.split('\n');
        if let Some(first) = parts.next()
            && let Ok(constraint) = VersionConstraint::parse(first)
        {
            let available: Vec<String> = parts.map(str::to_string).collect();
            let _ = select_version(&available, &constraint);
        }
    }
});
