//! Evaluated module trees to cloud documents.
//!
//! Layout handed to policies:
//!
//! ```text
//! resource.<type>[]   data.<type>[]   provider.<name>[]   provider.default[]
//! module[]   variable[]   output[]   locals[]   <other kind>[]
//! ```
//!
//! Every block object carries `__address`, `__kind`, `__type`, `__name`, `__range` and
//! `__occurrences` (the module call sites leading to it). Attributes become
//! `{value, unknown, __range}` objects and nested blocks become arrays of block objects
//! under their kind. Nested blocks report the address and call sites of the top-level
//! block they belong to.

use iacguard_eval::{EvaluatedAttribute, EvaluatedBlock, EvaluatedModule};
use iacguard_policy::{Input, Subtype};
use iacguard_types::Occurrence;
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

/// Resource type fragments whose service is not the second segment of the type name.
const SERVICE_ALIASES: &[(&str, &str)] = &[
    ("aws_ami", "ec2"),
    ("aws_default_security_group", "ec2"),
    ("aws_ebs_", "ec2"),
    ("aws_eip", "ec2"),
    ("aws_instance", "ec2"),
    ("aws_launch_", "ec2"),
    ("aws_network_", "ec2"),
    ("aws_security_group", "ec2"),
    ("aws_subnet", "ec2"),
    ("aws_vpc", "ec2"),
    ("aws_db_", "rds"),
    ("aws_alb", "elb"),
    ("aws_lb", "elb"),
];

/// Group for `resource`, `data` and `provider` blocks that carry no label.
const UNLABELLED: &str = "default";

/// Builds the cloud input for one evaluated root module and its descendants.
pub fn cloud_input(module: &EvaluatedModule) -> Input {
    let blocks = module.all_blocks();
    let subtypes = subtypes_of(&blocks);
    Input::cloud(module.path.clone(), subtypes, cloud_document(&blocks))
}

fn cloud_document(blocks: &[&EvaluatedBlock]) -> Value {
    let mut doc = Map::new();
    for block in blocks {
        let object = block_object(block, &block.address, &occurrences(&block.call_sites));
        let group = match block.kind.as_str() {
            "resource" | "data" | "provider" => {
                let label = grouping_label(block).unwrap_or(UNLABELLED);
                doc.entry(block.kind.clone())
                    .or_insert_with(|| Value::Object(Map::new()))
                    .as_object_mut()
                    .map(|by_label| by_label.entry(label.to_string()).or_insert_with(|| json!([])))
            }
            _ => Some(doc.entry(block.kind.clone()).or_insert_with(|| json!([]))),
        };
        if let Some(Value::Array(items)) = group {
            items.push(object);
        }
    }
    Value::Object(doc)
}

fn grouping_label(block: &EvaluatedBlock) -> Option<&str> {
    match block.kind.as_str() {
        "resource" | "data" => block.type_label.as_deref(),
        _ => block.labels.first().map(String::as_str),
    }
}

fn occurrences(sites: &[Occurrence]) -> Value {
    Value::Array(
        sites
            .iter()
            .map(|site| json!({"resource": site.resource, "range": site.range.to_json()}))
            .collect(),
    )
}

fn block_object(block: &EvaluatedBlock, address: &str, occurrences: &Value) -> Value {
    let mut object = Map::new();
    object.insert("__address".to_string(), json!(address));
    object.insert("__kind".to_string(), json!(block.kind));
    object.insert(
        "__type".to_string(),
        json!(block.type_label.as_deref().unwrap_or(block.kind.as_str())),
    );
    object.insert("__name".to_string(), json!(block.name));
    object.insert("__range".to_string(), block.range.to_json());
    object.insert("__occurrences".to_string(), occurrences.clone());

    for (name, attribute) in &block.attributes {
        object.insert(name.clone(), attribute_object(attribute));
    }
    for nested in &block.blocks {
        let entry = object.entry(nested.kind.clone()).or_insert_with(|| json!([]));
        if let Value::Array(items) = entry {
            items.push(block_object(nested, address, occurrences));
        }
    }
    Value::Object(object)
}

fn attribute_object(attribute: &EvaluatedAttribute) -> Value {
    json!({
        "value": attribute.value.to_json(),
        "unknown": attribute.value.is_unknown(),
        "__range": attribute.range.to_json(),
    })
}

/// Provider/service pairs of every resource and data source type, e.g. `aws_s3_bucket`
/// gives `aws`/`s3`.
fn subtypes_of(blocks: &[&EvaluatedBlock]) -> Vec<Subtype> {
    let subtypes: BTreeSet<Subtype> = blocks
        .iter()
        .filter(|b| b.kind == "resource" || b.kind == "data")
        .filter_map(|b| b.type_label.as_deref())
        .filter_map(subtype_of)
        .collect();
    subtypes.into_iter().collect()
}

fn subtype_of(resource_type: &str) -> Option<Subtype> {
    let (provider, rest) = resource_type.split_once('_')?;
    let service = SERVICE_ALIASES
        .iter()
        .find(|(prefix, _)| resource_type.starts_with(prefix))
        .map(|(_, service)| *service)
        .unwrap_or_else(|| rest.split('_').next().unwrap_or(rest));
    Some(Subtype::new(provider, service))
}

#[cfg(test)]
mod tests {
    use super::*;
    use iacguard_eval::Value as HclValue;
    use iacguard_types::{RepoPath, SourceRange};
    use std::collections::BTreeMap;

    fn range(line: u32) -> SourceRange {
        SourceRange::new(RepoPath::new("main.tf"), line, line)
    }

    fn block(kind: &str, labels: &[&str]) -> EvaluatedBlock {
        let type_label = matches!(kind, "resource" | "data").then(|| labels[0].to_string());
        let name = labels.last().map(|s| s.to_string());
        EvaluatedBlock {
            kind: kind.to_string(),
            type_label,
            name,
            address: labels.join("."),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            attributes: BTreeMap::new(),
            blocks: Vec::new(),
            range: range(1),
            module_address: String::new(),
            call_sites: Vec::new(),
        }
    }

    fn with_attr(mut block: EvaluatedBlock, name: &str, value: HclValue, line: u32) -> EvaluatedBlock {
        block.attributes.insert(
            name.to_string(),
            EvaluatedAttribute {
                value,
                range: range(line),
            },
        );
        block
    }

    #[test]
    fn resources_are_grouped_by_type() {
        let bucket = with_attr(block("resource", &["aws_s3_bucket", "logs"]), "acl", HclValue::string("private"), 2);
        let variable = block("variable", &["region"]);
        let doc = cloud_document(&[&bucket, &variable]);

        let obj = &doc["resource"]["aws_s3_bucket"][0];
        assert_eq!(obj["__address"], "aws_s3_bucket.logs");
        assert_eq!(obj["__kind"], "resource");
        assert_eq!(obj["__type"], "aws_s3_bucket");
        assert_eq!(obj["__name"], "logs");
        assert_eq!(obj["acl"]["value"], "private");
        assert_eq!(obj["acl"]["unknown"], false);
        assert_eq!(obj["acl"]["__range"]["start_line"], 2);
        assert_eq!(doc["variable"][0]["__name"], "region");
    }

    #[test]
    fn unlabelled_providers_do_not_hide_labelled_ones() {
        let bare = block("provider", &[]);
        let aws = with_attr(block("provider", &["aws"]), "region", HclValue::string("eu-west-1"), 3);
        let doc = cloud_document(&[&bare, &aws]);

        assert_eq!(doc["provider"]["default"].as_array().map(Vec::len), Some(1));
        assert_eq!(doc["provider"]["aws"][0]["region"]["value"], "eu-west-1");
    }

    #[test]
    fn unknown_values_are_flagged() {
        let bucket = with_attr(block("resource", &["aws_s3_bucket", "b"]), "bucket", HclValue::Unknown, 2);
        let doc = cloud_document(&[&bucket]);
        let attr = &doc["resource"]["aws_s3_bucket"][0]["bucket"];
        assert_eq!(attr["value"], Value::Null);
        assert_eq!(attr["unknown"], true);
    }

    #[test]
    fn nested_blocks_inherit_the_owner_address_and_call_sites() {
        let mut group = block("resource", &["aws_security_group", "web"]);
        group.address = "module.app.aws_security_group.web".to_string();
        group.call_sites = vec![Occurrence {
            resource: "module.app".to_string(),
            range: range(7),
        }];
        let mut ingress = with_attr(block("ingress", &[]), "from_port", HclValue::Number(443.0), 3);
        ingress.address = String::new();
        group.blocks = vec![ingress.clone(), ingress];

        let doc = cloud_document(&[&group]);
        let rules = doc["resource"]["aws_security_group"][0]["ingress"]
            .as_array()
            .expect("ingress array");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0]["__address"], "module.app.aws_security_group.web");
        assert_eq!(rules[0]["__kind"], "ingress");
        assert_eq!(rules[0]["__occurrences"][0]["resource"], "module.app");
        assert_eq!(rules[0]["__occurrences"][0]["range"]["start_line"], 7);
        assert_eq!(rules[0]["from_port"]["value"], 443);
    }

    #[test]
    fn providers_are_grouped_by_name() {
        let provider = block("provider", &["aws"]);
        let doc = cloud_document(&[&provider]);
        assert_eq!(doc["provider"]["aws"][0]["__kind"], "provider");
    }

    #[test]
    fn subtypes_follow_resource_types() {
        assert_eq!(subtype_of("aws_s3_bucket"), Some(Subtype::new("aws", "s3")));
        assert_eq!(subtype_of("aws_security_group_rule"), Some(Subtype::new("aws", "ec2")));
        assert_eq!(subtype_of("aws_db_instance"), Some(Subtype::new("aws", "rds")));
        assert_eq!(subtype_of("google_storage_bucket"), Some(Subtype::new("google", "storage")));
        assert_eq!(subtype_of("random"), None);
    }

    #[test]
    fn subtypes_are_deduplicated() {
        let a = block("resource", &["aws_s3_bucket", "a"]);
        let b = block("resource", &["aws_s3_bucket_acl", "b"]);
        let c = block("data", &["aws_vpc", "main"]);
        assert_eq!(
            subtypes_of(&[&a, &b, &c]),
            vec![Subtype::new("aws", "ec2"), Subtype::new("aws", "s3")]
        );
    }
}
