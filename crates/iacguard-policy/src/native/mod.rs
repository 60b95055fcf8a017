//! Checks compiled into the binary. Disabled in rules-only mode.

mod s3_public_acl;
mod sg_description;

use crate::evaluator::PolicyEvaluator;
use serde_json::Value;
use std::sync::Arc;

pub use s3_public_acl::S3PublicAcl;
pub use sg_description::SecurityGroupDescription;

pub fn native_checks() -> Vec<Arc<dyn PolicyEvaluator>> {
    vec![
        Arc::new(S3PublicAcl::new()),
        Arc::new(SecurityGroupDescription::new()),
    ]
}

/// Blocks of one resource type in a cloud document.
fn resources<'a>(contents: &'a Value, resource_type: &str) -> &'a [Value] {
    contents
        .get("resource")
        .and_then(|r| r.get(resource_type))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Known string value of an attribute object; unknown or absent values give `None`.
fn known_string<'a>(block: &'a Value, attribute: &str) -> Option<&'a str> {
    let attr = block.get(attribute)?;
    if attr.get("unknown").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    attr.get("value")?.as_str()
}
