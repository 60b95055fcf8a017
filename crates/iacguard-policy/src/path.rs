use serde_json::Value;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Root {
    Input,
    Each,
    Data,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
}

/// Reference into the values a rule sees: `input.resource.aws_s3_bucket[*]`,
/// `each.versioning[0].enabled`, `data.allowed_regions`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path {
    pub root: Root,
    pub segments: Vec<Segment>,
    text: String,
}

/// The three roots a path can start from.
#[derive(Clone, Copy, Debug)]
pub struct Bindings<'a> {
    pub input: &'a Value,
    pub each: &'a Value,
    pub data: &'a Value,
}

impl<'a> Bindings<'a> {
    pub fn with_each(&self, each: &'a Value) -> Bindings<'a> {
        Bindings { each, ..*self }
    }
}

impl Path {
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        let mut chars = text.char_indices().peekable();
        let mut root_end = text.len();
        while let Some(&(i, c)) = chars.peek() {
            if c == '.' || c == '[' {
                root_end = i;
                break;
            }
            chars.next();
        }

        let root = match &text[..root_end] {
            "input" => Root::Input,
            "each" => Root::Each,
            "data" => Root::Data,
            other => return Err(format!("unknown path root {other:?} (expected input, each or data)")),
        };

        let mut segments = Vec::new();
        let rest = &text[root_end..];
        let bytes = rest.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'.' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < bytes.len() && is_ident_byte(bytes[end]) {
                        end += 1;
                    }
                    if end == start {
                        return Err(format!("empty field name in path {text:?}"));
                    }
                    segments.push(Segment::Field(rest[start..end].to_string()));
                    i = end;
                }
                b'[' => {
                    let close = rest[i..]
                        .find(']')
                        .map(|off| i + off)
                        .ok_or_else(|| format!("unclosed '[' in path {text:?}"))?;
                    let inner = rest[i + 1..close].trim();
                    let segment = if inner == "*" {
                        Segment::Wildcard
                    } else if let Some(key) = inner
                        .strip_prefix('"')
                        .and_then(|s| s.strip_suffix('"'))
                    {
                        Segment::Field(key.to_string())
                    } else if let Ok(n) = inner.parse::<usize>() {
                        Segment::Index(n)
                    } else {
                        return Err(format!("invalid index [{inner}] in path {text:?}"));
                    };
                    segments.push(segment);
                    i = close + 1;
                }
                other => {
                    return Err(format!(
                        "unexpected character {:?} in path {text:?}",
                        other as char
                    ));
                }
            }
        }

        Ok(Self {
            root,
            segments,
            text: text.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// First field below the root, e.g. `resource` for `input.resource.aws_s3_bucket`.
    pub fn top_field(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Segment::Field(name)) => Some(name),
            _ => None,
        }
    }

    /// Every value the path reaches. Missing fields reach nothing; wildcards fan out.
    pub fn resolve<'v>(&self, bindings: &Bindings<'v>) -> Vec<&'v Value> {
        let start = match self.root {
            Root::Input => bindings.input,
            Root::Each => bindings.each,
            Root::Data => bindings.data,
        };

        let mut current = vec![start];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match (segment, value) {
                    (Segment::Field(name), Value::Object(map)) => next.extend(map.get(name)),
                    (Segment::Field(name), Value::Array(items)) => {
                        if let Ok(i) = name.parse::<usize>() {
                            next.extend(items.get(i));
                        }
                    }
                    (Segment::Index(i), Value::Array(items)) => next.extend(items.get(*i)),
                    (Segment::Wildcard, Value::Array(items)) => next.extend(items.iter()),
                    (Segment::Wildcard, Value::Object(map)) => next.extend(map.values()),
                    _ => {}
                }
            }
            current = next;
            if current.is_empty() {
                break;
            }
        }
        current
    }

    pub fn first<'v>(&self, bindings: &Bindings<'v>) -> Option<&'v Value> {
        self.resolve(bindings).into_iter().next()
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Attribute objects (`{value, unknown, __range}`) stand for their value in comparisons.
pub fn attribute_value(value: &Value) -> &Value {
    match value {
        Value::Object(map) if map.contains_key("__range") && map.contains_key("value") => &map["value"],
        other => other,
    }
}

/// True when `value` is an attribute object flagged as not statically known.
pub fn is_unknown_attribute(value: &Value) -> bool {
    value
        .get("unknown")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        && value.get("__range").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "resource": {
                "aws_s3_bucket": [
                    {"__address": "aws_s3_bucket.a", "acl": {"value": "private", "unknown": false, "__range": {}}},
                    {"__address": "aws_s3_bucket.b", "acl": {"value": null, "unknown": true, "__range": {}}}
                ]
            }
        })
    }

    #[test]
    fn parses_fields_indexes_and_wildcards() {
        let path = Path::parse(r#"input.resource["aws_s3_bucket"][*].acl"#).expect("parse");
        assert_eq!(path.root, Root::Input);
        assert_eq!(
            path.segments,
            vec![
                Segment::Field("resource".to_string()),
                Segment::Field("aws_s3_bucket".to_string()),
                Segment::Wildcard,
                Segment::Field("acl".to_string()),
            ]
        );
        assert_eq!(path.top_field(), Some("resource"));
    }

    #[test]
    fn rejects_bad_paths() {
        assert!(Path::parse("resource.x").is_err());
        assert!(Path::parse("input.").is_err());
        assert!(Path::parse("input[abc]").is_err());
        assert!(Path::parse("input[0").is_err());
        assert!(Path::parse("input x").is_err());
    }

    #[test]
    fn wildcards_fan_out_and_missing_fields_reach_nothing() {
        let doc = doc();
        let empty = json!({});
        let bindings = Bindings {
            input: &doc,
            each: &doc,
            data: &empty,
        };
        let acls = Path::parse("input.resource.aws_s3_bucket[*].acl")
            .expect("parse")
            .resolve(&bindings);
        assert_eq!(acls.len(), 2);
        assert_eq!(attribute_value(acls[0]), &json!("private"));
        assert!(is_unknown_attribute(acls[1]));

        let none = Path::parse("input.resource.aws_instance[*]").expect("parse").resolve(&bindings);
        assert!(none.is_empty());
        let second = Path::parse("input.resource.aws_s3_bucket.1.__address")
            .expect("parse")
            .first(&bindings);
        assert_eq!(second, Some(&json!("aws_s3_bucket.b")));
    }
}
