//! Fuzz target for rule file compilation, rule paths and message templates.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_rule_parser
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        iacguard_policy::fuzz::compile_rule_file(text);
        iacguard_policy::fuzz::parse_path_and_template(text);
    }
});
