//! Use case orchestration for iacguard.
//!
//! This crate provides the application layer: the scan use case that walks a tree, finds
//! root modules, evaluates them, adapts the result into policy documents and runs the
//! policy engine. It is intentionally thin and delegates heavy lifting to the evaluator and
//! policy crates.
//!
//! Findings are returned as data; formatting them is left to the caller.

#![forbid(unsafe_code)]

mod discover;
mod document;
mod filtered;
mod highlight;
pub mod logging;
mod scan;

pub use discover::find_root_modules;
pub use document::cloud_input;
pub use highlight::SourceFiles;
pub use logging::{LogConfig, LogFormat, init_logging};
pub use scan::{ScanInput, ScanOutput, run_scan};
