//! Shared test utilities for the iacguard workspace.
//!
//! Integration tests in several crates build on-disk fixture trees and compare scan
//! results; the helpers live here so each crate does not grow its own copy.

use iacguard_types::{Finding, Results, Status};
use serde_json::Value;
use std::io;
use std::path::Path;

/// Writes `files` (relative path, contents) below `root`, creating directories as needed.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) -> io::Result<()> {
    for (path, contents) in files {
        let target = root.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, contents)?;
    }
    Ok(())
}

/// One line per finding: `FAILED IAC-AWS-0001 main.tf:3 aws_s3_bucket.b`.
///
/// Compact enough to assert a whole result set at once.
pub fn summarize(results: &Results) -> Vec<String> {
    results.iter().map(summary_line).collect()
}

fn summary_line(finding: &Finding) -> String {
    let status = match finding.status() {
        Status::Failed => "FAILED",
        Status::Ignored => "IGNORED",
        Status::Passed => "PASSED",
    };
    let mut line = format!("{status} {}", finding.rule.id);
    if let Some(range) = &finding.range {
        line.push_str(&format!(" {range}"));
    }
    if let Some(resource) = &finding.resource {
        line.push_str(&format!(" {resource}"));
    }
    line
}

/// Normalize non-deterministic JSON fields for golden-file comparison.
///
/// Timestamp keys (`started_at`, `finished_at`) and `fingerprint` values are replaced at
/// any depth. Fingerprints are stable for a given input but change with every message
/// tweak, which would make golden files churn.
pub fn normalize_nondeterministic(mut value: Value) -> Value {
    normalize_recursive(&mut value);
    value
}

fn normalize_recursive(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for key in ["started_at", "finished_at"] {
                if map.contains_key(key) {
                    map.insert(key.to_string(), Value::String("__TIMESTAMP__".to_string()));
                }
            }
            if map.contains_key("fingerprint") {
                map.insert(
                    "fingerprint".to_string(),
                    Value::String("__FINGERPRINT__".to_string()),
                );
            }
            for val in map.values_mut() {
                normalize_recursive(val);
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                normalize_recursive(val);
            }
        }
        _ => {}
    }
}
