//! Stable DTOs and IDs used across the iacguard workspace.
//!
//! This crate is intentionally boring:
//! - stable namespace and rule-prefix identifiers
//! - canonical repo-relative path handling
//! - source ranges and the finding model handed to report writers
//! - a cancellation token shared by every long-running stage

#![forbid(unsafe_code)]

pub mod cancel;
pub mod finding;
pub mod ids;
pub mod path;
pub mod range;

pub use cancel::{Cancelled, CancellationToken};
pub use finding::{
    CodeLine, Finding, Occurrence, Outcome, Results, RuleMetadata, Severity, Status, Suppression,
};
pub use path::RepoPath;
pub use range::SourceRange;
