use iacguard_fs::FileSystem;
use iacguard_hcl::Value;
use iacguard_types::{Occurrence, RepoPath, SourceRange};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub struct EvaluatedAttribute {
    pub value: Value,
    pub range: SourceRange,
}

/// A block instance with every attribute resolved.
///
/// `count`/`for_each` copies are separate instances whose address carries the
/// instance key (`aws_s3_bucket.logs[0]`, `aws_s3_bucket.logs["a"]`).
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluatedBlock {
    pub kind: String,
    /// Resource or data source type; `None` for other kinds.
    pub type_label: Option<String>,
    pub name: Option<String>,
    pub address: String,
    pub labels: Vec<String>,
    pub attributes: BTreeMap<String, EvaluatedAttribute>,
    pub blocks: Vec<EvaluatedBlock>,
    pub range: SourceRange,
    /// Address of the owning module instance; empty for the root module.
    pub module_address: String,
    /// Module call sites from the root down to the owning module.
    pub call_sites: Vec<Occurrence>,
}

impl EvaluatedBlock {
    pub fn attribute(&self, name: &str) -> Option<&EvaluatedAttribute> {
        self.attributes.get(name)
    }

    pub fn value_of(&self, name: &str) -> Value {
        self.attributes
            .get(name)
            .map(|a| a.value.clone())
            .unwrap_or(Value::Null)
    }

    /// Object view used for references from other blocks: attributes plus nested
    /// blocks grouped by kind.
    pub fn to_value(&self) -> Value {
        let mut map: BTreeMap<String, Value> = self
            .attributes
            .iter()
            .map(|(k, a)| (k.clone(), a.value.clone()))
            .collect();
        for nested in &self.blocks {
            match map
                .entry(nested.kind.clone())
                .or_insert_with(|| Value::List(Vec::new()))
            {
                Value::List(items) => items.push(nested.to_value()),
                other => *other = Value::List(vec![nested.to_value()]),
            }
        }
        Value::Map(map)
    }

    fn rebase(&mut self, prefix: &str, outer: &Occurrence) {
        self.address = join_address(prefix, &self.address);
        self.module_address = join_address(prefix, &self.module_address);
        for site in &mut self.call_sites {
            site.resource = join_address(prefix, &site.resource);
        }
        self.call_sites.insert(0, outer.clone());
        for nested in &mut self.blocks {
            nested.rebase(prefix, outer);
        }
    }
}

/// A call that could not be resolved or evaluated; the subtree is absent from the result.
#[derive(Clone, Debug, PartialEq)]
pub struct SkippedModule {
    pub address: String,
    pub range: SourceRange,
    pub reason: String,
}

/// One module instance after its fixpoint.
#[derive(Clone)]
pub struct EvaluatedModule {
    pub name: String,
    pub fs: Arc<dyn FileSystem>,
    pub path: RepoPath,
    /// Empty for the root module, otherwise e.g. `module.network.module.subnet["a"]`.
    pub address: String,
    pub source: Option<String>,
    pub external: bool,
    pub blocks: Vec<EvaluatedBlock>,
    pub outputs: BTreeMap<String, Value>,
    pub children: Vec<EvaluatedModule>,
    pub skipped: Vec<SkippedModule>,
    pub converged: bool,
    pub passes: usize,
    /// Range of the `module` block that instantiated this module.
    pub call_site: Option<SourceRange>,
}

impl fmt::Debug for EvaluatedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatedModule")
            .field("name", &self.name)
            .field("fs", &self.fs.location())
            .field("path", &self.path)
            .field("address", &self.address)
            .field("blocks", &self.blocks.len())
            .field("children", &self.children)
            .field("converged", &self.converged)
            .field("passes", &self.passes)
            .finish_non_exhaustive()
    }
}

impl EvaluatedModule {
    /// Every block of this module and its descendants, parents first.
    pub fn all_blocks(&self) -> Vec<&EvaluatedBlock> {
        let mut out: Vec<&EvaluatedBlock> = self.blocks.iter().collect();
        for child in &self.children {
            out.extend(child.all_blocks());
        }
        out
    }

    /// This module and its descendants, parents first.
    pub fn all_modules(&self) -> Vec<&EvaluatedModule> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.all_modules());
        }
        out
    }

    pub fn blocks_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a EvaluatedBlock> {
        self.blocks.iter().filter(move |b| b.kind == kind)
    }

    pub fn find_child(&self, address: &str) -> Option<&EvaluatedModule> {
        self.all_modules().into_iter().find(|m| m.address == address)
    }

    /// Places a module evaluated at a relative address under `address`, called from `call_site`.
    pub(crate) fn instantiate(&self, name: &str, address: &str, call_site: &SourceRange) -> EvaluatedModule {
        let outer = Occurrence {
            resource: address.to_string(),
            range: call_site.clone(),
        };
        let mut module = self.clone();
        module.name = name.to_string();
        module.call_site = Some(call_site.clone());
        module.rebase(address, &outer);
        module
    }

    fn rebase(&mut self, prefix: &str, outer: &Occurrence) {
        self.address = join_address(prefix, &self.address);
        for block in &mut self.blocks {
            block.rebase(prefix, outer);
        }
        for skipped in &mut self.skipped {
            skipped.address = join_address(prefix, &skipped.address);
        }
        for child in &mut self.children {
            child.rebase(prefix, outer);
        }
    }
}

pub(crate) fn join_address(prefix: &str, rest: &str) -> String {
    match (prefix.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}.{rest}"),
    }
}

/// Key of one `count`/`for_each` copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstanceKey {
    None,
    Index(usize),
    Key(String),
}

impl InstanceKey {
    pub fn suffix(&self) -> String {
        match self {
            InstanceKey::None => String::new(),
            InstanceKey::Index(i) => format!("[{i}]"),
            InstanceKey::Key(k) => format!("[{k:?}]"),
        }
    }
}
