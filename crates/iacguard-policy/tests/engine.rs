use iacguard_fs::MemFs;
use iacguard_policy::{
    Engine, EngineOptions, Input, MemorySink, PolicyError, PolicySources, SourceDir, Subtype, TraceMode,
};
use iacguard_types::{CancellationToken, Outcome, RepoPath, SourceRange, Status, Suppression};
use serde_json::{Value, json};
use std::sync::Arc;

fn range(file: &str, start: u32, end: u32) -> Value {
    json!({"filename": file, "start_line": start, "end_line": end})
}

fn attr(value: Value, file: &str, line: u32) -> Value {
    json!({"value": value, "unknown": false, "__range": range(file, line, line)})
}

fn bucket(address: &str, name: &str, file: &str, line: u32) -> Value {
    json!({
        "__address": address,
        "__kind": "resource",
        "__type": "aws_s3_bucket",
        "__name": address.rsplit('.').next().unwrap_or_default(),
        "__range": range(file, line, line + 2),
        "__occurrences": [],
        "bucket": attr(json!(name), file, line + 1),
    })
}

fn cloud(path: &str, resources: Value) -> Input {
    Input::cloud(
        RepoPath::new(path),
        vec![Subtype::new("aws", "s3")],
        json!({"resource": resources}),
    )
}

fn user_options() -> EngineOptions {
    EngineOptions {
        embedded_policies: false,
        embedded_libraries: false,
        rules_only: true,
        ..EngineOptions::default()
    }
}

fn engine_with(files: &[(&str, &str)], options: EngineOptions) -> Engine {
    let fs = Arc::new(MemFs::from_files(files.iter().copied()));
    let sources = PolicySources {
        policy_dirs: vec![SourceDir::new(fs, RepoPath::new("policies"))],
        data_dirs: Vec::new(),
    };
    Engine::load(&sources, options, &CancellationToken::new()).expect("engine")
}

fn engine(files: &[(&str, &str)]) -> Engine {
    engine_with(files, user_options())
}

const EMPTY_NAME: &str = r#"
package = "users.naming"
schema = "cloud"

[metadata]
id = "USR-001"
title = "Bucket name is empty"
severity = "HIGH"

[metadata.dynamic]
title = "Bucket {{ each.__address }} in {{ input.region }} has an empty name"

[[rule]]
name = "deny_empty_name"
each = "input.resource.aws_s3_bucket[*]"
when = { path = "each.bucket", op = "empty" }
message = "bucket name must not be empty"
"#;

#[test]
fn empty_name_produces_one_failure_at_the_resource_range() {
    let engine = engine(&[("policies/naming.toml", EMPTY_NAME)]);
    let input = cloud(
        ".",
        json!({"aws_s3_bucket": [bucket("aws_s3_bucket.a", "", "main.tf", 1)]}),
    );
    let output = engine.evaluate(&[input], &CancellationToken::new()).expect("evaluate");

    let failed: Vec<_> = output.results.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].outcome, Outcome::Fail);
    assert_eq!(failed[0].range, Some(SourceRange::new(RepoPath::new("main.tf"), 1, 3)));
    assert_eq!(failed[0].resource.as_deref(), Some("aws_s3_bucket.a"));
    assert_eq!(failed[0].message, "bucket name must not be empty");
    assert!(!failed[0].fingerprint.is_empty());
    assert!(output.errors.is_empty());
}

#[test]
fn clean_input_yields_one_pass() {
    let engine = engine(&[("policies/naming.toml", EMPTY_NAME)]);
    let input = cloud(".", json!({"aws_s3_bucket": [bucket("aws_s3_bucket.a", "logs", "main.tf", 1)]}));
    let output = engine.evaluate(&[input], &CancellationToken::new()).expect("evaluate");
    assert_eq!(output.results.failed().count(), 0);
    let passed: Vec<_> = output.results.passed().collect();
    assert_eq!(passed.len(), 1);
    assert_eq!(passed[0].rule_name, "deny_empty_name");
}

#[test]
fn dynamic_titles_differ_per_input() {
    let engine = engine(&[("policies/naming.toml", EMPTY_NAME)]);
    let mut first = cloud("a", json!({"aws_s3_bucket": [bucket("aws_s3_bucket.a", "", "a/main.tf", 1)]}));
    first.contents["region"] = json!("eu-west-1");
    let mut second = cloud("b", json!({"aws_s3_bucket": [bucket("aws_s3_bucket.b", "", "b/main.tf", 1)]}));
    second.contents["region"] = json!("us-east-1");

    let output = engine
        .evaluate(&[first, second], &CancellationToken::new())
        .expect("evaluate");
    let mut titles: Vec<String> = output.results.failed().map(|f| f.rule.title.clone()).collect();
    titles.sort();
    assert_eq!(
        titles,
        vec![
            "Bucket aws_s3_bucket.a in eu-west-1 has an empty name".to_string(),
            "Bucket aws_s3_bucket.b in us-east-1 has an empty name".to_string(),
        ]
    );
}

#[test]
fn non_matching_selectors_produce_nothing() {
    let policy = r#"
package = "users.k8s"

[[input.selector]]
type = "kubernetes"

[[rule]]
name = "deny_everything"
"#;
    let scoped = r#"
package = "users.gcs"

[[input.selector]]
type = "cloud"
subtypes = [{ provider = "google", service = "storage" }]

[[rule]]
name = "deny_everything"
"#;
    let engine = engine(&[("policies/k8s.toml", policy), ("policies/gcs.toml", scoped)]);
    let input = cloud(".", json!({"aws_s3_bucket": [bucket("aws_s3_bucket.a", "x", "main.tf", 1)]}));
    let output = engine.evaluate(&[input], &CancellationToken::new()).expect("evaluate");
    assert!(output.results.is_empty());
}

#[test]
fn namespace_exception_ignores_but_keeps_the_outcome() {
    let exceptions = r#"
package = "namespace.exceptions"

[[exception]]
namespaces = ["users"]
"#;
    let engine = engine(&[("policies/naming.toml", EMPTY_NAME), ("policies/exceptions.toml", exceptions)]);
    let input = cloud(".", json!({"aws_s3_bucket": [bucket("aws_s3_bucket.a", "", "main.tf", 1)]}));
    let output = engine.evaluate(&[input], &CancellationToken::new()).expect("evaluate");

    assert_eq!(output.results.failed().count(), 0);
    let ignored: Vec<_> = output.results.ignored().collect();
    assert_eq!(ignored.len(), 1);
    assert_eq!(ignored[0].suppression, Some(Suppression::Namespace));
    assert_eq!(ignored[0].outcome, Outcome::Fail);
}

#[test]
fn rule_exception_applies_within_its_namespace_only() {
    let same_namespace = r#"
package = "users.naming"

[[exception]]
rules = ["empty_name"]
when = { path = "input.resource.aws_s3_bucket[*].bucket", op = "exists" }
"#;
    let other_namespace = r#"
package = "users.other"

[[exception]]
rules = ["deny_empty_name"]
"#;
    let input = || cloud(".", json!({"aws_s3_bucket": [bucket("aws_s3_bucket.a", "", "main.tf", 1)]}));

    let engine_other = engine(&[("policies/naming.toml", EMPTY_NAME), ("policies/other.toml", other_namespace)]);
    let output = engine_other.evaluate(&[input()], &CancellationToken::new()).expect("evaluate");
    assert_eq!(output.results.failed().count(), 1);

    let engine_same = engine(&[("policies/naming.toml", EMPTY_NAME), ("policies/except.toml", same_namespace)]);
    let output = engine_same.evaluate(&[input()], &CancellationToken::new()).expect("evaluate");
    let ignored: Vec<_> = output.results.ignored().collect();
    assert_eq!(ignored.len(), 1);
    assert_eq!(ignored[0].suppression, Some(Suppression::Rule));
}

#[test]
fn exceptions_never_turn_passes_into_failures() {
    let exceptions = "package = \"namespace.exceptions\"\n[[exception]]\nnamespaces = [\"users.naming\"]\n";
    let engine = engine(&[("policies/naming.toml", EMPTY_NAME), ("policies/exceptions.toml", exceptions)]);
    let input = cloud(".", json!({"aws_s3_bucket": [bucket("aws_s3_bucket.a", "logs", "main.tf", 1)]}));
    let output = engine.evaluate(&[input], &CancellationToken::new()).expect("evaluate");
    let all: Vec<_> = output.results.iter().collect();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status(), Status::Ignored);
    assert_eq!(all[0].outcome, Outcome::Pass);
}

const TYPE_ERROR: &str = r#"
package = "users.ports"

[[rule]]
name = "deny_high_port"
each = "input.resource.aws_s3_bucket[*]"
when = { path = "each.bucket", op = "gt", value = 1024 }
"#;

fn inputs(n: usize) -> Vec<Input> {
    (0..n)
        .map(|i| {
            cloud(
                &format!("root{i}"),
                json!({"aws_s3_bucket": [bucket("aws_s3_bucket.a", "not-a-number", "main.tf", 1)]}),
            )
        })
        .collect()
}

#[test]
fn runtime_errors_below_the_limit_are_reported() {
    let engine = engine_with(
        &[("policies/ports.toml", TYPE_ERROR), ("policies/naming.toml", EMPTY_NAME)],
        EngineOptions {
            error_limit: 3,
            ..user_options()
        },
    );
    let output = engine.evaluate(&inputs(3), &CancellationToken::new()).expect("partial results");
    assert_eq!(output.errors.len(), 3);
    assert_eq!(output.results.passed().count(), 1);
}

#[test]
fn runtime_errors_above_the_limit_abort() {
    let engine = engine_with(
        &[("policies/ports.toml", TYPE_ERROR)],
        EngineOptions {
            error_limit: 3,
            ..user_options()
        },
    );
    let err = engine.evaluate(&inputs(4), &CancellationToken::new()).expect_err("limit");
    assert!(matches!(err, PolicyError::ErrorLimitExceeded { count: 4, limit: 3, .. }));
}

#[test]
fn deprecated_policies_run_only_when_included() {
    let deprecated = "package = \"users.old\"\n[metadata]\ndeprecated = true\n[[rule]]\nname = \"deny_all\"\n";
    let input = || cloud(".", json!({}));

    let skipped = engine(&[("policies/old.toml", deprecated)]);
    assert_eq!(skipped.policies().count(), 0);
    assert!(skipped.evaluate(&[input()], &CancellationToken::new()).expect("evaluate").results.is_empty());

    let included = engine_with(
        &[("policies/old.toml", deprecated)],
        EngineOptions {
            include_deprecated: true,
            ..user_options()
        },
    );
    let output = included.evaluate(&[input()], &CancellationToken::new()).expect("evaluate");
    assert_eq!(output.results.failed().count(), 1);
}

#[test]
fn namespace_allow_list_filters_user_policies() {
    let files = [
        ("policies/a.toml", "package = \"users.a\"\n[[rule]]\nname = \"deny\"\n"),
        ("policies/b.toml", "package = \"custom.b\"\n[[rule]]\nname = \"deny\"\n"),
        ("policies/c.toml", "package = \"builtin.c\"\n[[rule]]\nname = \"deny\"\n"),
    ];
    let engine = engine_with(
        &files,
        EngineOptions {
            namespaces: vec!["users".to_string()],
            ..user_options()
        },
    );
    let mut namespaces: Vec<&str> = engine.policies().map(|p| p.namespace.as_str()).collect();
    namespaces.sort();
    assert_eq!(namespaces, vec!["builtin.c", "users.a"]);
}

#[test]
fn warn_rules_are_flagged_as_warnings() {
    let policy = "package = \"users.w\"\n[[rule]]\nname = \"warn_always\"\nmessage = \"heads up\"\n";
    let engine = engine(&[("policies/w.toml", policy)]);
    let output = engine.evaluate(&[cloud(".", json!({}))], &CancellationToken::new()).expect("evaluate");
    let failed: Vec<_> = output.results.failed().collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].warning);
}

#[test]
fn module_instances_merge_into_one_finding_with_occurrences() {
    let instance = |module: &str, line: u32| {
        let mut b = bucket(&format!("{module}.aws_s3_bucket.this"), "", "bucket/main.tf", 1);
        b["__occurrences"] = json!([{"resource": module, "range": range("main.tf", line, line + 2)}]);
        b
    };
    let policy = r#"
package = "users.naming"

[[rule]]
name = "deny_empty_name"
each = "input.resource.aws_s3_bucket[*]"
when = { path = "each.bucket", op = "empty" }
message = "bucket name must not be empty"
"#;
    let engine = engine(&[("policies/naming.toml", policy)]);
    let input = cloud(".", json!({"aws_s3_bucket": [instance("module.a", 1), instance("module.b", 5)]}));
    let output = engine.evaluate(&[input], &CancellationToken::new()).expect("evaluate");

    let failed: Vec<_> = output.results.failed().collect();
    assert_eq!(failed.len(), 1);
    let sites: Vec<&str> = failed[0].occurrences.iter().map(|o| o.resource.as_str()).collect();
    assert_eq!(sites, vec!["module.a", "module.b"]);
}

#[test]
fn traces_go_to_the_configured_destination() {
    let per_result = engine_with(
        &[("policies/naming.toml", EMPTY_NAME)],
        EngineOptions {
            trace: TraceMode::PerResult,
            ..user_options()
        },
    );
    let input = || cloud(".", json!({"aws_s3_bucket": [bucket("aws_s3_bucket.a", "", "main.tf", 1)]}));
    let output = per_result.evaluate(&[input()], &CancellationToken::new()).expect("evaluate");
    let traces = &output.results.as_slice()[0].traces;
    assert!(traces.iter().any(|t| t.contains("deny_empty_name on aws_s3_bucket.a: hit")));

    let sink = Arc::new(MemorySink::default());
    let global = engine_with(
        &[("policies/naming.toml", EMPTY_NAME)],
        EngineOptions {
            trace: TraceMode::Global(sink.clone()),
            ..user_options()
        },
    );
    let output = global.evaluate(&[input()], &CancellationToken::new()).expect("evaluate");
    assert!(output.results.as_slice()[0].traces.is_empty());
    assert!(!sink.lines().is_empty());
}

#[test]
fn native_checks_attribute_to_the_acl_attribute() {
    let options = EngineOptions {
        embedded_policies: false,
        rules_only: false,
        ..EngineOptions::default()
    };
    let engine = Engine::load(&PolicySources::default(), options, &CancellationToken::new()).expect("engine");
    let mut b = bucket("aws_s3_bucket.site", "site", "main.tf", 10);
    b["acl"] = attr(json!("public-read"), "main.tf", 12);
    let output = engine
        .evaluate(&[cloud(".", json!({"aws_s3_bucket": [b]}))], &CancellationToken::new())
        .expect("evaluate");

    let failed: Vec<_> = output.results.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].rule.id, "IAC-AWS-0001");
    assert_eq!(failed[0].range, Some(SourceRange::new(RepoPath::new("main.tf"), 12, 12)));
    assert_eq!(failed[0].resource_range, Some(SourceRange::new(RepoPath::new("main.tf"), 10, 12)));
}

#[test]
fn sequential_and_parallel_runs_agree() {
    let files = [("policies/naming.toml", EMPTY_NAME), ("policies/ports.toml", TYPE_ERROR)];
    let many: Vec<Input> = (0..8)
        .map(|i| {
            cloud(
                &format!("root{i}"),
                json!({"aws_s3_bucket": [bucket(&format!("aws_s3_bucket.b{i}"), "", &format!("root{i}/main.tf"), 1)]}),
            )
        })
        .collect();
    let run = |parallelism| {
        engine_with(
            &files,
            EngineOptions {
                parallelism,
                error_limit: 100,
                ..user_options()
            },
        )
        .evaluate(&many, &CancellationToken::new())
        .expect("evaluate")
    };
    let sequential = run(1);
    let parallel = run(4);
    assert_eq!(sequential.results, parallel.results);
    assert_eq!(sequential.results.failed().count(), 8);
}

#[test]
fn cancelled_runs_stop() {
    let engine = engine(&[("policies/naming.toml", EMPTY_NAME)]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine.evaluate(&inputs(2), &cancel).expect_err("cancelled");
    assert!(matches!(err, PolicyError::Cancelled(_)));
}
