use crate::path::RepoPath;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Line range inside one source file. Lines are 1-based and inclusive.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct SourceRange {
    pub filename: RepoPath,
    pub start_line: u32,
    pub end_line: u32,
}

impl SourceRange {
    pub fn new(filename: RepoPath, start_line: u32, end_line: u32) -> Self {
        Self {
            filename,
            start_line,
            end_line: end_line.max(start_line),
        }
    }

    pub fn contains_line(&self, line: u32) -> bool {
        line >= self.start_line && line <= self.end_line
    }

    pub fn contains(&self, other: &SourceRange) -> bool {
        self.filename == other.filename
            && other.start_line >= self.start_line
            && other.end_line <= self.end_line
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "filename": self.filename.as_str(),
            "start_line": self.start_line,
            "end_line": self.end_line,
        })
    }

    /// Reads a range back from the `{filename, start_line, end_line}` object shape.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let filename = value.get("filename")?.as_str()?;
        let start = value.get("start_line")?.as_u64()?;
        let end = value.get("end_line").and_then(|v| v.as_u64()).unwrap_or(start);
        Some(Self::new(
            RepoPath::new(filename),
            u32::try_from(start).ok()?,
            u32::try_from(end).ok()?,
        ))
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_line == self.end_line {
            write!(f, "{}:{}", self.filename, self.start_line)
        } else {
            write!(f, "{}:{}-{}", self.filename, self.start_line, self.end_line)
        }
    }
}
