//! Built-in function library.
//!
//! Functions receive fully evaluated arguments. An unknown top-level argument makes the
//! result unknown; so does any call this library cannot answer statically (unsupported
//! function, filesystem access, type mismatch).

use crate::scope::values_equal;
use iacguard_hcl::{Value, format_number};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

/// Names this library evaluates. `try` and `can` are handled by the expression evaluator.
pub const SUPPORTED: &[&str] = &[
    "abs", "alltrue", "anytrue", "ceil", "chomp", "coalesce", "coalescelist", "compact", "concat",
    "contains", "distinct", "element", "endswith", "flatten", "floor", "format", "index", "join",
    "jsondecode", "jsonencode", "keys", "length", "lookup", "lower", "max", "merge", "min", "one",
    "range", "regex", "regexall", "replace", "reverse", "setintersection", "setunion", "sha256",
    "slice", "sort", "split", "startswith", "strcontains", "strrev", "substr", "sum", "title",
    "tobool", "tolist", "tomap", "tonumber", "toset", "tostring", "trim", "trimprefix",
    "trimspace", "trimsuffix", "upper", "values", "zipmap",
];

pub fn is_supported(name: &str) -> bool {
    SUPPORTED.contains(&name)
}

pub fn call(name: &str, args: Vec<Value>) -> Value {
    if args.iter().any(Value::is_unknown) {
        return Value::Unknown;
    }
    if !is_supported(name) {
        debug!("function {}() is not evaluated statically", name);
        return Value::Unknown;
    }
    dispatch(name, &args).unwrap_or(Value::Unknown)
}

fn dispatch(name: &str, args: &[Value]) -> Option<Value> {
    Some(match name {
        // strings
        "lower" => Value::string(str_arg(args, 0)?.to_lowercase()),
        "upper" => Value::string(str_arg(args, 0)?.to_uppercase()),
        "title" => Value::string(title(&str_arg(args, 0)?)),
        "trimspace" => Value::string(str_arg(args, 0)?.trim()),
        "chomp" => Value::string(str_arg(args, 0)?.trim_end_matches(['\n', '\r'])),
        "strrev" => Value::string(str_arg(args, 0)?.chars().rev().collect::<String>()),
        "trim" => {
            let s = str_arg(args, 0)?;
            let cut = str_arg(args, 1)?;
            Value::string(s.trim_matches(|c: char| cut.contains(c)))
        }
        "trimprefix" => {
            let s = str_arg(args, 0)?;
            let p = str_arg(args, 1)?;
            Value::string(s.strip_prefix(p.as_str()).unwrap_or(&s))
        }
        "trimsuffix" => {
            let s = str_arg(args, 0)?;
            let p = str_arg(args, 1)?;
            Value::string(s.strip_suffix(p.as_str()).unwrap_or(&s))
        }
        "startswith" => Value::Bool(str_arg(args, 0)?.starts_with(&str_arg(args, 1)?)),
        "endswith" => Value::Bool(str_arg(args, 0)?.ends_with(&str_arg(args, 1)?)),
        "strcontains" => Value::Bool(str_arg(args, 0)?.contains(&str_arg(args, 1)?)),
        "substr" => {
            let s = str_arg(args, 0)?;
            let chars: Vec<char> = s.chars().collect();
            let offset = int_arg(args, 1)?;
            let length = int_arg(args, 2)?;
            let start = if offset < 0 {
                chars.len().checked_sub(offset.unsigned_abs() as usize)?
            } else {
                (offset as usize).min(chars.len())
            };
            let end = if length < 0 {
                chars.len()
            } else {
                (start + length as usize).min(chars.len())
            };
            Value::string(chars[start..end].iter().collect::<String>())
        }
        "split" => {
            let sep = str_arg(args, 0)?;
            let s = str_arg(args, 1)?;
            if s.is_empty() {
                Value::List(Vec::new())
            } else {
                Value::List(s.split(sep.as_str()).map(Value::string).collect())
            }
        }
        "join" => {
            let sep = str_arg(args, 0)?;
            let mut parts = Vec::new();
            for list in &args[1..] {
                for item in list.as_list()? {
                    parts.push(item.to_template_string()?);
                }
            }
            Value::string(parts.join(&sep))
        }
        "replace" => {
            let s = str_arg(args, 0)?;
            let search = str_arg(args, 1)?;
            let replacement = str_arg(args, 2)?;
            match search.strip_prefix('/').and_then(|r| r.strip_suffix('/')) {
                Some(pattern) if !pattern.is_empty() => {
                    let re = regex::Regex::new(pattern).ok()?;
                    Value::string(re.replace_all(&s, replacement.as_str()).into_owned())
                }
                _ => Value::string(s.replace(&search, &replacement)),
            }
        }
        "format" => Value::string(format(&str_arg(args, 0)?, &args[1..])?),
        "regex" => {
            let re = regex::Regex::new(&str_arg(args, 0)?).ok()?;
            let s = str_arg(args, 1)?;
            regex_match(&re, re.captures(&s)?)
        }
        "regexall" => {
            let re = regex::Regex::new(&str_arg(args, 0)?).ok()?;
            let s = str_arg(args, 1)?;
            Value::List(re.captures_iter(&s).map(|c| regex_match(&re, c)).collect())
        }
        "sha256" => {
            let mut hasher = Sha256::new();
            hasher.update(str_arg(args, 0)?.as_bytes());
            Value::string(hex::encode(hasher.finalize()))
        }

        // collections
        "length" => match args.first()? {
            Value::List(items) => number(items.len()),
            Value::Map(map) => number(map.len()),
            Value::String(s) => number(s.chars().count()),
            _ => return None,
        },
        "concat" => {
            let mut out = Vec::new();
            for list in args {
                out.extend(list.as_list()?.iter().cloned());
            }
            Value::List(out)
        }
        "contains" => {
            let list = args.first()?.as_list()?;
            let needle = args.get(1)?;
            Value::Bool(list.iter().any(|v| values_equal(v, needle)))
        }
        "index" => {
            let list = args.first()?.as_list()?;
            let needle = args.get(1)?;
            number(list.iter().position(|v| values_equal(v, needle))?)
        }
        "distinct" | "toset" => Value::List(distinct(list_like(args.first()?)?)),
        "tolist" => Value::List(list_like(args.first()?)?),
        "flatten" => Value::List(flatten(args.first()?.as_list()?)),
        "keys" => Value::List(args.first()?.as_map()?.keys().map(Value::string).collect()),
        "values" => Value::List(args.first()?.as_map()?.values().cloned().collect()),
        "lookup" => {
            let map = args.first()?.as_map()?;
            let key = args.get(1)?.to_template_string()?;
            match map.get(&key) {
                Some(v) => v.clone(),
                None => args.get(2)?.clone(),
            }
        }
        "merge" => {
            let mut out = BTreeMap::new();
            for map in args {
                if map.is_null() {
                    continue;
                }
                out.extend(map.as_map()?.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Value::Map(out)
        }
        "tomap" => Value::Map(args.first()?.as_map()?.clone()),
        "zipmap" => {
            let keys = args.first()?.as_list()?;
            let values = args.get(1)?.as_list()?;
            if keys.len() != values.len() {
                return None;
            }
            let mut out = BTreeMap::new();
            for (k, v) in keys.iter().zip(values) {
                out.insert(k.to_template_string()?, v.clone());
            }
            Value::Map(out)
        }
        "element" => {
            let list = args.first()?.as_list()?;
            if list.is_empty() {
                return None;
            }
            let i = usize::try_from(int_arg(args, 1)?).ok()?;
            list[i % list.len()].clone()
        }
        "slice" => {
            let list = args.first()?.as_list()?;
            let start = usize::try_from(int_arg(args, 1)?).ok()?;
            let end = usize::try_from(int_arg(args, 2)?).ok()?;
            Value::List(list.get(start..end)?.to_vec())
        }
        "reverse" => Value::List(args.first()?.as_list()?.iter().rev().cloned().collect()),
        "sort" => {
            let mut items = args
                .first()?
                .as_list()?
                .iter()
                .map(Value::to_template_string)
                .collect::<Option<Vec<_>>>()?;
            items.sort();
            Value::List(items.into_iter().map(Value::String).collect())
        }
        "compact" => Value::List(
            args.first()?
                .as_list()?
                .iter()
                .filter(|v| !v.is_null() && v.as_str() != Some(""))
                .cloned()
                .collect(),
        ),
        "coalesce" => args
            .iter()
            .find(|v| !v.is_null() && v.as_str() != Some(""))
            .cloned()
            .unwrap_or(Value::Unknown),
        "coalescelist" => args
            .iter()
            .find(|v| v.as_list().is_some_and(|l| !l.is_empty()))
            .cloned()
            .unwrap_or(Value::List(Vec::new())),
        "one" => match args.first()?.as_list()? {
            [] => Value::Null,
            [only] => only.clone(),
            _ => return None,
        },
        "setunion" => {
            let mut out = Vec::new();
            for set in args {
                out.extend(list_like(set)?);
            }
            Value::List(distinct(out))
        }
        "setintersection" => {
            let (first, rest) = args.split_first()?;
            let mut out = distinct(list_like(first)?);
            for set in rest {
                let other = list_like(set)?;
                out.retain(|v| other.iter().any(|o| values_equal(o, v)));
            }
            Value::List(out)
        }
        "range" => {
            let nums = args.iter().map(Value::as_f64).collect::<Option<Vec<_>>>()?;
            let (start, end, step) = match nums.as_slice() {
                [end] => (0.0, *end, 1.0),
                [start, end] => (*start, *end, if start <= end { 1.0 } else { -1.0 }),
                [start, end, step] => (*start, *end, *step),
                _ => return None,
            };
            if step == 0.0 {
                return None;
            }
            let mut out = Vec::new();
            let mut n = start;
            while (step > 0.0 && n < end) || (step < 0.0 && n > end) {
                out.push(Value::Number(n));
                n += step;
                if out.len() > 1024 {
                    return None;
                }
            }
            Value::List(out)
        }
        "alltrue" => Value::Bool(
            args.first()?
                .as_list()?
                .iter()
                .map(Value::as_bool)
                .collect::<Option<Vec<_>>>()?
                .into_iter()
                .all(|b| b),
        ),
        "anytrue" => Value::Bool(
            args.first()?
                .as_list()?
                .iter()
                .map(Value::as_bool)
                .collect::<Option<Vec<_>>>()?
                .into_iter()
                .any(|b| b),
        ),

        // numbers
        "abs" => Value::Number(num_arg(args, 0)?.abs()),
        "ceil" => Value::Number(num_arg(args, 0)?.ceil()),
        "floor" => Value::Number(num_arg(args, 0)?.floor()),
        "max" => Value::Number(numbers(args)?.into_iter().reduce(f64::max)?),
        "min" => Value::Number(numbers(args)?.into_iter().reduce(f64::min)?),
        "sum" => Value::Number(
            args.first()?
                .as_list()?
                .iter()
                .map(Value::as_f64)
                .sum::<Option<f64>>()?,
        ),

        // conversion and encoding
        "tostring" => match args.first()? {
            Value::Null => Value::Null,
            Value::Unknown => Value::Unknown,
            other => Value::string(other.to_template_string()?),
        },
        "tonumber" => match args.first()? {
            Value::Null => Value::Null,
            other => Value::Number(other.as_f64()?),
        },
        "tobool" => match args.first()? {
            Value::Null => Value::Null,
            other => Value::Bool(other.as_bool()?),
        },
        "jsonencode" => {
            let value = args.first()?;
            if !value.is_wholly_known() {
                return None;
            }
            Value::string(serde_json::to_string(&value.to_json()).ok()?)
        }
        "jsondecode" => {
            let parsed: serde_json::Value = serde_json::from_str(&str_arg(args, 0)?).ok()?;
            Value::from_json(&parsed)
        }
        _ => return None,
    })
}

fn number(n: usize) -> Value {
    Value::Number(n as f64)
}

fn str_arg(args: &[Value], i: usize) -> Option<String> {
    args.get(i)?.to_template_string()
}

fn num_arg(args: &[Value], i: usize) -> Option<f64> {
    args.get(i)?.as_f64()
}

fn int_arg(args: &[Value], i: usize) -> Option<i64> {
    let n = num_arg(args, i)?;
    (n.fract() == 0.0).then_some(n as i64)
}

/// `max(1, 2)` and `max([1, 2]...)` both arrive as a flat argument list.
fn numbers(args: &[Value]) -> Option<Vec<f64>> {
    args.iter().map(Value::as_f64).collect()
}

fn list_like(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::List(items) => Some(items.clone()),
        Value::Null => Some(Vec::new()),
        _ => None,
    }
}

fn distinct(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.iter().any(|v| values_equal(v, &item)) {
            out.push(item);
        }
    }
    out
}

fn flatten(items: &[Value]) -> Vec<Value> {
    let mut out = Vec::new();
    for item in items {
        match item {
            Value::List(inner) => out.extend(flatten(inner)),
            other => out.push(other.clone()),
        }
    }
    out
}

fn title(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !c.is_alphanumeric();
    }
    out
}

fn regex_match(re: &regex::Regex, caps: regex::Captures<'_>) -> Value {
    let names: Vec<&str> = re.capture_names().flatten().collect();
    if !names.is_empty() {
        let mut map = BTreeMap::new();
        for name in names {
            let v = caps.name(name).map(|m| Value::string(m.as_str())).unwrap_or(Value::Null);
            map.insert(name.to_string(), v);
        }
        return Value::Map(map);
    }
    if caps.len() > 1 {
        return Value::List(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| Value::string(m.as_str())).unwrap_or(Value::Null))
                .collect(),
        );
    }
    caps.get(0).map(|m| Value::string(m.as_str())).unwrap_or(Value::Null)
}

/// `%s`, `%d`, `%v`, `%q`, `%f` and `%%` verbs.
fn format(spec: &str, args: &[Value]) -> Option<String> {
    let mut out = String::new();
    let mut chars = spec.chars();
    let mut next_arg = args.iter();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '%' => out.push('%'),
            's' | 'v' => out.push_str(&next_arg.next()?.to_template_string()?),
            'd' => out.push_str(&format_number(next_arg.next()?.as_f64()?.trunc())),
            'f' => out.push_str(&format!("{:.6}", next_arg.next()?.as_f64()?)),
            'q' => out.push_str(&format!("{:?}", next_arg.next()?.to_template_string()?)),
            _ => return None,
        }
    }
    Some(out)
}
