use super::{known_string, resources};
use crate::error::RuleError;
use crate::evaluator::{EvalEnv, PolicyEvaluator, PolicyInfo, PolicySource, RawOutcome, RuleKind, hit_on_block};
use crate::input::{Input, Subtype};
use crate::selector::Selector;
use iacguard_types::ids::{CHECK_AWS_SG_DESCRIPTION, INPUT_TYPE_CLOUD, NAMESPACE_NATIVE};
use iacguard_types::{RuleMetadata, Severity};
use serde_json::Value;

const RULE: &str = "warn_missing_description";

/// Security groups and their inline rules should say what they are for.
#[derive(Debug)]
pub struct SecurityGroupDescription {
    info: PolicyInfo,
}

impl SecurityGroupDescription {
    pub fn new() -> Self {
        Self {
            info: PolicyInfo {
                namespace: format!("{NAMESPACE_NATIVE}.aws.ec2.sg_description"),
                metadata: RuleMetadata {
                    id: CHECK_AWS_SG_DESCRIPTION.to_string(),
                    short_code: "add-description-to-security-group".to_string(),
                    title: "Security group without a description".to_string(),
                    description: "Descriptions make the intent of network rules reviewable.".to_string(),
                    recommended_actions: "Add a description to the security group and each inline rule.".to_string(),
                    severity: Severity::Low,
                    provider: "aws".to_string(),
                    service: "ec2".to_string(),
                    ..RuleMetadata::default()
                },
                schema: Some(INPUT_TYPE_CLOUD.to_string()),
                selectors: vec![Selector::new(INPUT_TYPE_CLOUD).with_subtype(Subtype::new("aws", "ec2"))],
                source: PolicySource::Native,
                rule_names: vec![RULE.to_string()],
            },
        }
    }
}

impl Default for SecurityGroupDescription {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_description(block: &Value) -> bool {
    if block
        .get("description")
        .and_then(|d| d.get("unknown"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return false;
    }
    known_string(block, "description").is_none_or(|d| d.trim().is_empty())
}

impl PolicyEvaluator for SecurityGroupDescription {
    fn info(&self) -> &PolicyInfo {
        &self.info
    }

    fn evaluate(&self, input: &Input, env: &EvalEnv<'_>) -> Result<Vec<RawOutcome>, RuleError> {
        let mut hits = Vec::new();
        for group in resources(&input.contents, "aws_security_group") {
            env.trace(|| {
                let address = group.get("__address").and_then(Value::as_str).unwrap_or("?");
                format!("{}: checking {address}", self.info.namespace)
            });
            if missing_description(group) {
                hits.push(hit_on_block(
                    RULE,
                    RuleKind::Warn,
                    "Security group does not have a description.".to_string(),
                    group,
                    group.get("description"),
                ));
            }
            for direction in ["ingress", "egress"] {
                let rules = group
                    .get(direction)
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for rule in rules {
                    if missing_description(rule) {
                        hits.push(hit_on_block(
                            RULE,
                            RuleKind::Warn,
                            format!("Security group {direction} rule does not have a description."),
                            group,
                            Some(rule),
                        ));
                    }
                }
            }
        }
        Ok(hits)
    }
}
