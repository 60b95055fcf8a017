//! The capability every policy implements, and the outcome shape it returns.

use crate::condition::Library;
use crate::error::RuleError;
use crate::input::Input;
use crate::selector::Selector;
use crate::trace::Tracer;
use iacguard_types::ids::{RULE_PREFIX_ALLOW, RULE_PREFIX_DENY, RULE_PREFIX_WARN};
use iacguard_types::{Occurrence, RuleMetadata, SourceRange};
use serde_json::Value;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Deny,
    Warn,
    Allow,
}

impl RuleKind {
    pub fn from_rule_name(name: &str) -> Option<Self> {
        if name.starts_with(RULE_PREFIX_DENY) {
            Some(RuleKind::Deny)
        } else if name.starts_with(RULE_PREFIX_WARN) {
            Some(RuleKind::Warn)
        } else if name.starts_with(RULE_PREFIX_ALLOW) {
            Some(RuleKind::Allow)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicySource {
    Embedded(String),
    User { location: String, path: String },
    Native,
}

impl fmt::Display for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicySource::Embedded(path) => write!(f, "embedded:{path}"),
            PolicySource::User { location, path } => write!(f, "{location}/{path}"),
            PolicySource::Native => f.write_str("native"),
        }
    }
}

/// Static facts about a policy, known before any input is seen.
#[derive(Clone, Debug)]
pub struct PolicyInfo {
    pub namespace: String,
    pub metadata: RuleMetadata,
    pub schema: Option<String>,
    pub selectors: Vec<Selector>,
    pub source: PolicySource,
    pub rule_names: Vec<String>,
}

impl PolicyInfo {
    pub fn is_native(&self) -> bool {
        self.source == PolicySource::Native
    }

    /// Rule name reported on the pass result of an input with no hits.
    pub fn pass_rule_name(&self) -> &str {
        self.rule_names.first().map(String::as_str).unwrap_or(RULE_PREFIX_DENY)
    }
}

/// One rule hit (or the synthesized pass) before exceptions are applied.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawOutcome {
    pub rule_name: String,
    pub kind: Option<RuleKind>,
    pub hit: bool,
    pub message: String,
    /// Attributed range: explicit location, else cause, else the owning block.
    pub range: Option<SourceRange>,
    pub cause_range: Option<SourceRange>,
    pub resource_range: Option<SourceRange>,
    pub resource: Option<String>,
    pub occurrences: Vec<Occurrence>,
    /// Per-result metadata rendered from dynamic templates.
    pub metadata: Option<RuleMetadata>,
}

/// Shared state a policy may consult while evaluating.
#[derive(Clone, Copy, Debug)]
pub struct EvalEnv<'a> {
    pub data: &'a Value,
    pub library: &'a Library,
    pub tracer: Option<&'a Tracer>,
}

impl EvalEnv<'_> {
    pub fn trace(&self, line: impl FnOnce() -> String) {
        if let Some(tracer) = self.tracer {
            tracer.record(line());
        }
    }
}

/// Runs against an opaque input document and reports structured hits.
pub trait PolicyEvaluator: Send + Sync + fmt::Debug {
    fn info(&self) -> &PolicyInfo;

    /// Returns the hits only; an empty result means the input passed.
    fn evaluate(&self, input: &Input, env: &EvalEnv<'_>) -> Result<Vec<RawOutcome>, RuleError>;
}

/// Resource address, block range and call-site chain carried by a block object.
pub fn block_attribution(block: &Value) -> (Option<String>, Option<SourceRange>, Vec<Occurrence>) {
    let resource = block
        .get("__address")
        .and_then(Value::as_str)
        .map(str::to_string);
    let range = block.get("__range").and_then(SourceRange::from_json);
    let occurrences = block
        .get("__occurrences")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(Occurrence {
                        resource: item.get("resource")?.as_str()?.to_string(),
                        range: SourceRange::from_json(item.get("range")?)?,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    (resource, range, occurrences)
}

/// Range of an attribute object, or of a nested block.
pub fn value_range(value: &Value) -> Option<SourceRange> {
    value.get("__range").and_then(SourceRange::from_json)
}

/// Outcome for a hit on `block`, attributed to `cause` when given.
pub fn hit_on_block(rule_name: &str, kind: RuleKind, message: String, block: &Value, cause: Option<&Value>) -> RawOutcome {
    let (resource, resource_range, occurrences) = block_attribution(block);
    let cause_range = cause.and_then(value_range);
    RawOutcome {
        rule_name: rule_name.to_string(),
        kind: Some(kind),
        hit: true,
        message,
        range: cause_range.clone().or_else(|| resource_range.clone()),
        cause_range,
        resource_range,
        resource,
        occurrences,
        metadata: None,
    }
}
