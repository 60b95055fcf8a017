use crate::expr::Expr;
use iacguard_types::{RepoPath, SourceRange};
use std::collections::BTreeSet;
use tracing::warn;

#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub expr: Expr,
    pub range: SourceRange,
}

/// Typed, labeled node of a configuration file.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub kind: String,
    pub labels: Vec<String>,
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
    pub range: SourceRange,
}

/// Block kinds that may legitimately repeat with identical labels inside one module.
const REPEATABLE_KINDS: &[&str] = &["locals", "terraform", "provider", "moved", "import", "removed", "check"];

impl Block {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn nested(&self, kind: &str) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(move |b| b.kind == kind)
    }

    /// First label: the resource type for `resource`/`data`, the name for everything else.
    pub fn type_label(&self) -> Option<&str> {
        self.labels.first().map(String::as_str)
    }

    /// Second label of `resource`/`data` blocks, first label of other named blocks.
    pub fn name_label(&self) -> Option<&str> {
        match self.kind.as_str() {
            "resource" | "data" => self.labels.get(1).map(String::as_str),
            _ => self.labels.first().map(String::as_str),
        }
    }

    /// Identity within one module: `(kind, labels)`.
    pub fn identity(&self) -> (String, Vec<String>) {
        (self.kind.clone(), self.labels.clone())
    }
}

/// One parsed configuration file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct File {
    pub path: RepoPath,
    /// Top-level attributes; only variable definition files carry these.
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
}

/// Drops later blocks whose identity repeats an earlier one, logging each drop.
pub fn dedupe_blocks(blocks: Vec<Block>) -> Vec<Block> {
    let mut seen: BTreeSet<(String, Vec<String>)> = BTreeSet::new();
    let mut out = Vec::with_capacity(blocks.len());

    for block in blocks {
        if REPEATABLE_KINDS.contains(&block.kind.as_str()) {
            out.push(block);
            continue;
        }
        if !seen.insert(block.identity()) {
            warn!(
                "duplicate {} block {:?} at {} ignored",
                block.kind, block.labels, block.range
            );
            continue;
        }
        out.push(block);
    }

    out
}
