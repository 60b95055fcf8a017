use super::{known_string, resources};
use crate::error::RuleError;
use crate::evaluator::{EvalEnv, PolicyEvaluator, PolicyInfo, PolicySource, RawOutcome, RuleKind, hit_on_block};
use crate::input::{Input, Subtype};
use crate::selector::Selector;
use iacguard_types::ids::{CHECK_AWS_S3_PUBLIC_ACL, INPUT_TYPE_CLOUD, NAMESPACE_NATIVE};
use iacguard_types::{RuleMetadata, Severity};

const RULE: &str = "deny_public_acl";
const PUBLIC_ACLS: &[&str] = &["public-read", "public-read-write", "authenticated-read"];

/// S3 buckets must not grant public access through a canned ACL.
#[derive(Debug)]
pub struct S3PublicAcl {
    info: PolicyInfo,
}

impl S3PublicAcl {
    pub fn new() -> Self {
        Self {
            info: PolicyInfo {
                namespace: format!("{NAMESPACE_NATIVE}.aws.s3.public_acl"),
                metadata: RuleMetadata {
                    id: CHECK_AWS_S3_PUBLIC_ACL.to_string(),
                    short_code: "no-public-acl".to_string(),
                    title: "S3 bucket has a public ACL".to_string(),
                    description: "Canned ACLs that grant read or write access to everyone expose bucket contents.".to_string(),
                    recommended_actions: "Use the private ACL and grant access through bucket policies.".to_string(),
                    severity: Severity::High,
                    provider: "aws".to_string(),
                    service: "s3".to_string(),
                    ..RuleMetadata::default()
                },
                schema: Some(INPUT_TYPE_CLOUD.to_string()),
                selectors: vec![Selector::new(INPUT_TYPE_CLOUD).with_subtype(Subtype::new("aws", "s3"))],
                source: PolicySource::Native,
                rule_names: vec![RULE.to_string()],
            },
        }
    }
}

impl Default for S3PublicAcl {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEvaluator for S3PublicAcl {
    fn info(&self) -> &PolicyInfo {
        &self.info
    }

    fn evaluate(&self, input: &Input, env: &EvalEnv<'_>) -> Result<Vec<RawOutcome>, RuleError> {
        let mut hits = Vec::new();
        for bucket in resources(&input.contents, "aws_s3_bucket") {
            let Some(acl) = known_string(bucket, "acl") else {
                continue;
            };
            env.trace(|| format!("{}: acl = {acl}", self.info.namespace));
            if PUBLIC_ACLS.contains(&acl) {
                hits.push(hit_on_block(
                    RULE,
                    RuleKind::Deny,
                    format!("Bucket has a public ACL: {acl:?}"),
                    bucket,
                    bucket.get("acl"),
                ));
            }
        }
        Ok(hits)
    }
}
