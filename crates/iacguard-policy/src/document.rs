//! Serde model of a declarative rule file.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    pub package: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub metadata: MetadataDoc,
    #[serde(default)]
    pub input: InputDoc,
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleDoc>,
    #[serde(default, rename = "exception")]
    pub exceptions: Vec<ExceptionDoc>,
    #[serde(default, rename = "define")]
    pub defines: Vec<DefineDoc>,
}

impl RuleFile {
    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataDoc {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub avd_id: String,
    #[serde(default)]
    pub short_code: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub recommended_actions: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub deprecated: bool,
    /// Field name to `{{ path }}` template, rendered per result.
    #[serde(default)]
    pub dynamic: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputDoc {
    #[serde(default)]
    pub selector: Vec<SelectorDoc>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectorDoc {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtypes: Vec<SubtypeDoc>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubtypeDoc {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDoc {
    pub name: String,
    /// Path whose values are checked one at a time as `each`.
    #[serde(default)]
    pub each: Option<String>,
    #[serde(default)]
    pub when: Option<ConditionDoc>,
    #[serde(default)]
    pub message: Option<String>,
    /// Path to the attribute that caused the result; its range becomes the attribution.
    #[serde(default)]
    pub cause: Option<String>,
    /// Path to an explicit `{msg, filepath, startline, endline}` location.
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExceptionDoc {
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub when: Option<ConditionDoc>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefineDoc {
    pub name: String,
    pub when: ConditionDoc,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionDoc {
    #[serde(default)]
    pub all: Option<Vec<ConditionDoc>>,
    #[serde(default)]
    pub any: Option<Vec<ConditionDoc>>,
    #[serde(default)]
    pub not: Option<Box<ConditionDoc>>,
    #[serde(default)]
    pub call: Option<String>,
    /// For `call`: values bound as `each` inside the predicate.
    #[serde(default)]
    pub with: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    /// Operand read from a path instead of a literal.
    #[serde(default)]
    pub value_from: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_rule_file() {
        let file = RuleFile::parse(
            r#"
package = "builtin.aws.s3.versioning"
schema = "cloud"

[metadata]
id = "IAC-AWS-0101"
title = "Bucket versioning disabled"
severity = "medium"

[metadata.dynamic]
title = "Bucket {{ each.bucket }} has versioning disabled"

[[input.selector]]
type = "cloud"
subtypes = [{ provider = "aws", service = "s3" }]

[[rule]]
name = "deny_unversioned"
each = "input.resource.aws_s3_bucket[*]"
when = { not = { path = "each.versioning[*].enabled", op = "truthy" } }
message = "versioning is not enabled"
cause = "each.versioning[0].enabled"
"#,
        )
        .expect("parse");

        assert_eq!(file.package, "builtin.aws.s3.versioning");
        assert_eq!(file.metadata.severity.as_deref(), Some("medium"));
        assert_eq!(file.metadata.dynamic.len(), 1);
        assert_eq!(file.input.selector[0].subtypes[0].service.as_deref(), Some("s3"));
        let when = file.rules[0].when.as_ref().expect("when");
        assert!(when.not.is_some());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = RuleFile::parse("package = \"x\"\n[[rule]]\nname = \"deny\"\nwhne = {}\n")
            .expect_err("unknown key");
        assert!(err.contains("whne"));
    }
}
