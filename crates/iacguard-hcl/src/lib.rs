//! Block model: configuration files as typed blocks with labeled attributes.
//!
//! Parsing goes through `hcl-edit` and is immediately converted into an owned model
//! ([`Block`], [`Expr`], [`Value`]) that carries 1-based line ranges for every block and
//! attribute. Nothing here evaluates expressions.

#![forbid(unsafe_code)]

mod block;
mod expr;
mod parse;
mod value;

pub use block::{Attribute, Block, File, dedupe_blocks};
pub use expr::{BinaryOp, Expr, ForExpr, ObjectKey, TemplatePart, TraversalOp, UnaryOp};
pub use parse::{ParseError, parse_file};
pub use value::{Value, format_number};

/// Fuzz-friendly API. These functions never panic on any input.
pub mod fuzz {
    use super::*;
    use iacguard_types::RepoPath;

    /// Parse arbitrary text as a configuration file, discarding the result.
    pub fn parse(text: &str) -> Result<(), ParseError> {
        let _ = parse_file(&RepoPath::new("fuzz.tf"), text)?;
        Ok(())
    }
}
