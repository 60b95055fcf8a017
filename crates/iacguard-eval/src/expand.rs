use crate::model::{EvaluatedAttribute, EvaluatedBlock, InstanceKey};
use crate::scope::Scope;
use iacguard_hcl::{Block, Value};
use std::cell::Cell;
use std::collections::BTreeMap;
use tracing::debug;

pub const COUNT: &str = "count";
pub const FOR_EACH: &str = "for_each";
const DYNAMIC: &str = "dynamic";

/// One copy of a block together with the `count`/`each` bindings it is evaluated with.
#[derive(Clone, Debug)]
pub(crate) struct Instance {
    pub key: InstanceKey,
    pub bindings: Vec<(String, Value)>,
}

impl Instance {
    fn single() -> Self {
        Self {
            key: InstanceKey::None,
            bindings: Vec::new(),
        }
    }

    fn counted(index: usize) -> Self {
        let count = BTreeMap::from([("index".to_string(), Value::Number(index as f64))]);
        Self {
            key: InstanceKey::Index(index),
            bindings: vec![(COUNT.to_string(), Value::Map(count))],
        }
    }

    fn keyed(key: InstanceKey, each_key: Value, each_value: Value) -> Self {
        let each = BTreeMap::from([
            ("key".to_string(), each_key),
            ("value".to_string(), each_value),
        ]);
        Self {
            key,
            bindings: vec![("each".to_string(), Value::Map(each))],
        }
    }

    pub fn scope<'s>(&self, parent: &'s Scope<'_>) -> Scope<'s> {
        let mut scope = parent.child();
        for (name, value) in &self.bindings {
            scope.bind(name.clone(), value.clone());
        }
        scope
    }
}

/// Upper bound on the copies one `count`/`for_each`/`dynamic` expansion may produce within a
/// pass. Expansions past the bound keep their first `max` copies and mark the limit as hit.
#[derive(Debug)]
pub(crate) struct InstanceLimit {
    max: usize,
    hit: Cell<bool>,
}

impl InstanceLimit {
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            hit: Cell::new(false),
        }
    }

    pub fn was_hit(&self) -> bool {
        self.hit.get()
    }

    /// Number of copies to keep out of `total`.
    fn bound(&self, total: usize, what: &str, block: &Block) -> usize {
        if total <= self.max {
            return total;
        }
        debug!(
            "{what} of {} block at {} expands to {total} copies; keeping the first {}",
            block.kind, block.range, self.max
        );
        self.hit.set(true);
        self.max
    }
}

/// Copies of `block` after `count`/`for_each` expansion.
///
/// A known `count = 0` or empty `for_each` yields no copies. An expansion value that cannot be
/// determined yields a single copy so the block is still scanned.
pub(crate) fn instances(block: &Block, scope: &Scope<'_>, limit: &InstanceLimit) -> Vec<Instance> {
    if let Some(count) = block.attribute(COUNT) {
        return match scope.eval(&count.expr).as_f64() {
            Some(n) if n >= 0.0 && n.fract() == 0.0 => {
                (0..limit.bound(n as usize, COUNT, block)).map(Instance::counted).collect()
            }
            _ => {
                debug!("count of {} block at {} is not known; using one instance", block.kind, block.range);
                vec![Instance::counted(0)]
            }
        };
    }

    let Some(for_each) = block.attribute(FOR_EACH) else {
        return vec![Instance::single()];
    };
    match scope.eval(&for_each.expr) {
        Value::Map(map) => {
            let keep = limit.bound(map.len(), FOR_EACH, block);
            map.into_iter()
                .take(keep)
                .map(|(k, v)| Instance::keyed(InstanceKey::Key(k.clone()), Value::String(k), v))
                .collect()
        }
        Value::List(items) if items.iter().all(|v| v.to_template_string().is_some()) => {
            let mut keys: Vec<String> = items.iter().filter_map(Value::to_template_string).collect();
            keys.sort();
            keys.dedup();
            let keep = limit.bound(keys.len(), FOR_EACH, block);
            keys.into_iter()
                .take(keep)
                .map(|k| Instance::keyed(InstanceKey::Key(k.clone()), Value::string(k.clone()), Value::String(k)))
                .collect()
        }
        _ => {
            debug!("for_each of {} block at {} is not known; using one instance", block.kind, block.range);
            vec![Instance::keyed(InstanceKey::None, Value::Unknown, Value::Unknown)]
        }
    }
}

pub(crate) fn has_expansion(block: &Block) -> bool {
    block.attribute(COUNT).is_some() || block.attribute(FOR_EACH).is_some()
}

/// Evaluates attributes and nested blocks, expanding `dynamic` blocks.
pub(crate) fn eval_body(
    block: &Block,
    scope: &Scope<'_>,
    address: &str,
    limit: &InstanceLimit,
) -> (BTreeMap<String, EvaluatedAttribute>, Vec<EvaluatedBlock>) {
    let attributes = block
        .attributes
        .iter()
        .map(|attr| {
            (
                attr.name.clone(),
                EvaluatedAttribute {
                    value: scope.eval(&attr.expr),
                    range: attr.range.clone(),
                },
            )
        })
        .collect();

    let mut nested = Vec::new();
    for child in &block.blocks {
        if child.kind == DYNAMIC {
            nested.extend(expand_dynamic(child, scope, address, limit));
        } else {
            let (attributes, blocks) = eval_body(child, scope, address, limit);
            nested.push(nested_block(child.kind.clone(), child, attributes, blocks, address));
        }
    }
    (attributes, nested)
}

fn expand_dynamic(
    dynamic: &Block,
    scope: &Scope<'_>,
    address: &str,
    limit: &InstanceLimit,
) -> Vec<EvaluatedBlock> {
    let Some(kind) = dynamic.type_label() else {
        return Vec::new();
    };
    let Some(content) = dynamic.nested("content").next() else {
        return Vec::new();
    };
    let iterator = dynamic
        .attribute("iterator")
        .and_then(|a| a.expr.as_identifier())
        .unwrap_or(kind)
        .to_string();

    let items: Vec<(Value, Value)> = match dynamic.attribute(FOR_EACH).map(|a| scope.eval(&a.expr)) {
        Some(Value::List(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::Number(i as f64), v))
            .collect(),
        Some(Value::Map(map)) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
        Some(Value::Null) => Vec::new(),
        _ => vec![(Value::Unknown, Value::Unknown)],
    };

    let keep = limit.bound(items.len(), DYNAMIC, dynamic);
    items
        .into_iter()
        .take(keep)
        .map(|(key, value)| {
            let mut inner = scope.child();
            let binding = BTreeMap::from([("key".to_string(), key), ("value".to_string(), value)]);
            inner.bind(iterator.clone(), Value::Map(binding));
            let (attributes, blocks) = eval_body(content, &inner, address, limit);
            nested_block(kind.to_string(), dynamic, attributes, blocks, address)
        })
        .collect()
}

fn nested_block(
    kind: String,
    source: &Block,
    attributes: BTreeMap<String, EvaluatedAttribute>,
    blocks: Vec<EvaluatedBlock>,
    address: &str,
) -> EvaluatedBlock {
    EvaluatedBlock {
        kind,
        type_label: None,
        name: None,
        address: address.to_string(),
        labels: if source.kind == DYNAMIC {
            Vec::new()
        } else {
            source.labels.clone()
        },
        attributes,
        blocks,
        range: source.range.clone(),
        module_address: String::new(),
        call_sites: Vec::new(),
    }
}
