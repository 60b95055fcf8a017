use crate::document::ConditionDoc;
use crate::error::RuleError;
use crate::path::{Bindings, Path, attribute_value, is_unknown_attribute};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Nesting limit for predicate calls.
pub const MAX_CALL_DEPTH: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Empty,
    NotEmpty,
    Exists,
    Missing,
    Unknown,
    Truthy,
    Falsy,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Gt,
    Ge,
    Lt,
    Le,
    In,
}

impl Op {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "eq" => Op::Eq,
            "ne" => Op::Ne,
            "empty" => Op::Empty,
            "not_empty" => Op::NotEmpty,
            "exists" => Op::Exists,
            "missing" => Op::Missing,
            "unknown" => Op::Unknown,
            "truthy" => Op::Truthy,
            "falsy" => Op::Falsy,
            "contains" => Op::Contains,
            "starts_with" => Op::StartsWith,
            "ends_with" => Op::EndsWith,
            "matches" => Op::Matches,
            "gt" => Op::Gt,
            "ge" => Op::Ge,
            "lt" => Op::Lt,
            "le" => Op::Le,
            "in" => Op::In,
            _ => return None,
        })
    }

    fn takes_operand(self) -> bool {
        !matches!(
            self,
            Op::Empty
                | Op::NotEmpty
                | Op::Exists
                | Op::Missing
                | Op::Unknown
                | Op::Truthy
                | Op::Falsy
        )
    }
}

#[derive(Clone, Debug)]
pub enum Operand {
    None,
    Literal(Value),
    Pattern(Regex),
    Path(Path),
}

#[derive(Clone, Debug)]
pub enum Condition {
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    Call { name: String, with: Option<Path> },
    Test { path: Path, op: Op, operand: Operand },
}

/// Compiled `define` predicates, keyed by `<package>.<name>`.
#[derive(Clone, Debug, Default)]
pub struct Library {
    defines: HashMap<String, Condition>,
}

impl Library {
    pub fn insert(&mut self, name: String, condition: Condition) {
        self.defines.insert(name, condition);
    }

    pub fn get(&self, name: &str) -> Option<&Condition> {
        self.defines.get(name)
    }

    pub fn len(&self) -> usize {
        self.defines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }
}

/// Compiles conditions for one package. `known` holds every predicate name in the set.
pub struct Compiler<'a> {
    pub package: &'a str,
    pub known: &'a BTreeSet<String>,
}

impl Compiler<'_> {
    pub fn compile(&self, doc: &ConditionDoc) -> Result<Condition, String> {
        let forms = [
            doc.all.is_some(),
            doc.any.is_some(),
            doc.not.is_some(),
            doc.call.is_some(),
            doc.path.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if forms != 1 {
            return Err("condition must have exactly one of all, any, not, call or path".to_string());
        }

        if let Some(items) = &doc.all {
            return Ok(Condition::All(self.compile_list(items)?));
        }
        if let Some(items) = &doc.any {
            return Ok(Condition::Any(self.compile_list(items)?));
        }
        if let Some(inner) = &doc.not {
            return Ok(Condition::Not(Box::new(self.compile(inner)?)));
        }
        if let Some(name) = &doc.call {
            let name = self.resolve_call(name)?;
            let with = doc.with.as_deref().map(Path::parse).transpose()?;
            return Ok(Condition::Call { name, with });
        }

        let Some(path) = &doc.path else {
            return Err("condition has no path".to_string());
        };
        let path = Path::parse(path)?;
        let op_name = doc.op.as_deref().unwrap_or("truthy");
        let op = Op::parse(op_name).ok_or_else(|| format!("unknown operator {op_name:?}"))?;
        let operand = self.compile_operand(op, doc)?;
        Ok(Condition::Test { path, op, operand })
    }

    fn compile_list(&self, items: &[ConditionDoc]) -> Result<Vec<Condition>, String> {
        items.iter().map(|item| self.compile(item)).collect()
    }

    fn resolve_call(&self, name: &str) -> Result<String, String> {
        if self.known.contains(name) {
            return Ok(name.to_string());
        }
        let local = format!("{}.{}", self.package, name);
        if self.known.contains(&local) {
            return Ok(local);
        }
        Err(format!("call to undefined predicate {name:?}"))
    }

    fn compile_operand(&self, op: Op, doc: &ConditionDoc) -> Result<Operand, String> {
        if !op.takes_operand() {
            if doc.value.is_some() || doc.value_from.is_some() {
                return Err(format!("operator {op:?} takes no value"));
            }
            return Ok(Operand::None);
        }

        match (&doc.value, &doc.value_from) {
            (Some(_), Some(_)) => Err("use either value or value_from, not both".to_string()),
            (None, None) => Err(format!("operator {op:?} needs a value")),
            (None, Some(path)) => Ok(Operand::Path(Path::parse(path)?)),
            (Some(value), None) => literal_operand(op, value),
        }
    }
}

fn literal_operand(op: Op, value: &Value) -> Result<Operand, String> {
    match op {
        Op::Matches => {
            let pattern = value
                .as_str()
                .ok_or_else(|| "matches needs a string pattern".to_string())?;
            Regex::new(pattern)
                .map(Operand::Pattern)
                .map_err(|e| format!("invalid pattern {pattern:?}: {e}"))
        }
        Op::StartsWith | Op::EndsWith if !value.is_string() => {
            Err(format!("operator {op:?} needs a string value"))
        }
        Op::Gt | Op::Ge | Op::Lt | Op::Le if !value.is_number() => {
            Err(format!("operator {op:?} needs a number value"))
        }
        Op::In if !value.is_array() => Err("operator In needs an array value".to_string()),
        _ => Ok(Operand::Literal(value.clone())),
    }
}

/// What a condition needs besides its bindings.
#[derive(Clone, Copy, Debug)]
pub struct EvalCtx<'a> {
    pub policy: &'a str,
    pub rule: &'a str,
    pub library: &'a Library,
    pub depth: usize,
}

impl Condition {
    pub fn eval(&self, bindings: &Bindings<'_>, cx: &EvalCtx<'_>) -> Result<bool, RuleError> {
        match self {
            Condition::All(items) => {
                for item in items {
                    if !item.eval(bindings, cx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any(items) => {
                for item in items {
                    if item.eval(bindings, cx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(inner) => Ok(!inner.eval(bindings, cx)?),
            Condition::Call { name, with } => eval_call(name, with.as_ref(), bindings, cx),
            Condition::Test { path, op, operand } => {
                eval_test(path, *op, operand, bindings, cx)
            }
        }
    }
}

fn eval_call(
    name: &str,
    with: Option<&Path>,
    bindings: &Bindings<'_>,
    cx: &EvalCtx<'_>,
) -> Result<bool, RuleError> {
    if cx.depth >= MAX_CALL_DEPTH {
        return Err(RuleError::Recursion {
            policy: cx.policy.to_string(),
            name: name.to_string(),
            limit: MAX_CALL_DEPTH,
        });
    }
    let Some(predicate) = cx.library.get(name) else {
        return Err(type_error(cx, format!("predicate {name} is not loaded")));
    };
    let inner = EvalCtx {
        depth: cx.depth + 1,
        ..*cx
    };

    let Some(with) = with else {
        return predicate.eval(bindings, &inner);
    };
    for value in with.resolve(bindings) {
        if predicate.eval(&bindings.with_each(value), &inner)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn eval_test(
    path: &Path,
    op: Op,
    operand: &Operand,
    bindings: &Bindings<'_>,
    cx: &EvalCtx<'_>,
) -> Result<bool, RuleError> {
    let values = path.resolve(bindings);
    match op {
        Op::Exists => return Ok(!values.is_empty()),
        Op::Missing => return Ok(values.is_empty()),
        Op::Unknown => return Ok(values.iter().any(|v| is_unknown_attribute(v))),
        _ => {}
    }

    let runtime_pattern;
    let operand = match operand {
        Operand::Path(from) => match from.first(bindings).map(attribute_value) {
            Some(Value::String(pattern)) if op == Op::Matches => {
                runtime_pattern = Regex::new(pattern)
                    .map_err(|e| type_error(cx, format!("invalid pattern {pattern:?}: {e}")))?;
                Resolved::Pattern(&runtime_pattern)
            }
            Some(value) => Resolved::Value(value),
            None => return Ok(false),
        },
        Operand::Literal(value) => Resolved::Value(value),
        Operand::Pattern(re) => Resolved::Pattern(re),
        Operand::None => Resolved::None,
    };

    for value in values {
        // Unknown attributes are present but empty; they satisfy no value comparison.
        if is_unknown_attribute(value) {
            if op == Op::Empty {
                return Ok(true);
            }
            continue;
        }
        if apply(op, attribute_value(value), &operand, cx)? {
            return Ok(true);
        }
    }
    Ok(false)
}

enum Resolved<'a> {
    None,
    Value(&'a Value),
    Pattern(&'a Regex),
}

fn apply(op: Op, value: &Value, operand: &Resolved<'_>, cx: &EvalCtx<'_>) -> Result<bool, RuleError> {
    let rhs = match operand {
        Resolved::Value(v) => Some(*v),
        _ => None,
    };

    Ok(match op {
        Op::Empty => is_empty(value),
        Op::NotEmpty => !is_empty(value),
        Op::Truthy => is_truthy(value),
        Op::Falsy => !is_truthy(value),
        Op::Eq => rhs.is_some_and(|rhs| values_equal(value, rhs)),
        Op::Ne => rhs.is_some_and(|rhs| !values_equal(value, rhs)),
        Op::Contains => match (value, rhs) {
            (Value::String(s), Some(Value::String(needle))) => s.contains(needle.as_str()),
            (Value::Array(items), Some(rhs)) => items.iter().any(|item| values_equal(attribute_value(item), rhs)),
            (Value::Object(map), Some(Value::String(key))) => map.contains_key(key),
            _ => false,
        },
        Op::StartsWith => match (value, rhs) {
            (Value::String(s), Some(Value::String(prefix))) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        Op::EndsWith => match (value, rhs) {
            (Value::String(s), Some(Value::String(suffix))) => s.ends_with(suffix.as_str()),
            _ => false,
        },
        Op::Matches => match (value, operand) {
            (Value::String(s), Resolved::Pattern(re)) => re.is_match(s),
            _ => false,
        },
        Op::In => match rhs {
            Some(Value::Array(items)) => items.iter().any(|item| values_equal(value, item)),
            Some(other) => values_equal(value, other),
            None => false,
        },
        Op::Gt | Op::Ge | Op::Lt | Op::Le => {
            if value.is_null() {
                return Ok(false);
            }
            let (Some(lhs), Some(rhs)) = (value.as_f64(), rhs.and_then(Value::as_f64)) else {
                return Err(type_error(
                    cx,
                    format!("cannot compare {} with {:?}", type_name(value), rhs),
                ));
            };
            match op {
                Op::Gt => lhs > rhs,
                Op::Ge => lhs >= rhs,
                Op::Lt => lhs < rhs,
                _ => lhs <= rhs,
            }
        }
        Op::Exists | Op::Missing | Op::Unknown => false,
    })
}

fn type_error(cx: &EvalCtx<'_>, message: String) -> RuleError {
    RuleError::Type {
        policy: cx.policy.to_string(),
        rule: cx.rule.to_string(),
        message,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}

/// JSON equality with numbers compared by value (`1` equals `1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        _ => a == b,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
