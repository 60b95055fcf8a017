use iacguard_app::{ScanInput, ScanOutput, run_scan};
use iacguard_fs::{FileSystem, MemFs};
use iacguard_policy::{PolicySources, SourceDir};
use iacguard_settings::Overrides;
use iacguard_types::{CancellationToken, RepoPath, Status};
use std::sync::Arc;

const RULES_ONLY: &str = "embedded_policies = false\nembedded_libraries = false\nrules_only = true\nparallelism = 1\n";

const EMPTY_NAME: &str = r#"
package = "users.naming"
schema = "cloud"

[metadata]
id = "USR-001"
title = "Bucket name is empty"
severity = "HIGH"

[[rule]]
name = "deny_empty_name"
each = "input.resource.aws_s3_bucket[*]"
when = { path = "each.bucket", op = "empty" }
message = "bucket name must not be empty"
"#;

const BUCKET_MODULE: &str = r#"resource "aws_s3_bucket" "this" {
  bucket = ""
}
"#;

struct Scan<'a> {
    files: &'a [(&'a str, &'a str)],
    policies: &'a [(&'a str, &'a str)],
    config: &'a str,
    overrides: Overrides,
    cancel: CancellationToken,
}

impl<'a> Scan<'a> {
    fn new(files: &'a [(&'a str, &'a str)], policies: &'a [(&'a str, &'a str)]) -> Self {
        Self {
            files,
            policies,
            config: RULES_ONLY,
            overrides: Overrides::default(),
            cancel: CancellationToken::new(),
        }
    }

    fn run(self) -> anyhow::Result<ScanOutput> {
        let cache = tempfile::tempdir().expect("tempdir");
        let fs: Arc<dyn FileSystem> = Arc::new(MemFs::from_files(self.files.iter().copied()));
        let policy_fs: Arc<dyn FileSystem> = Arc::new(MemFs::from_files(self.policies.iter().copied()));
        let overrides = Overrides {
            allow_downloads: Some(false),
            cache_dir: Some(cache.path().to_string_lossy().into_owned()),
            ..self.overrides
        };
        run_scan(ScanInput {
            fs,
            root: RepoPath::root(),
            config_text: self.config,
            overrides,
            extra_sources: PolicySources {
                policy_dirs: vec![SourceDir::new(policy_fs, RepoPath::new("policies"))],
                data_dirs: Vec::new(),
            },
            resolver: None,
            cancel: &self.cancel,
        })
    }
}

fn scan(files: &[(&str, &str)], policies: &[(&str, &str)]) -> ScanOutput {
    Scan::new(files, policies).run().expect("scan")
}

#[test]
fn empty_name_fails_once_at_the_resource_range() {
    let out = scan(&[("main.tf", BUCKET_MODULE)], &[("policies/naming.toml", EMPTY_NAME)]);

    let failed: Vec<_> = out.results.failed().collect();
    assert_eq!(failed.len(), 1);
    let range = failed[0].range.as_ref().expect("range");
    assert_eq!(range.filename, RepoPath::new("main.tf"));
    assert_eq!((range.start_line, range.end_line), (1, 3));
    assert_eq!(failed[0].resource.as_deref(), Some("aws_s3_bucket.this"));

    let lines: Vec<u32> = failed[0].code.iter().map(|l| l.number).collect();
    assert_eq!(lines, vec![1, 2, 3]);
    assert!(failed[0].code.iter().all(|l| l.is_cause));
    assert_eq!(out.roots, vec![RepoPath::root()]);
}

#[test]
fn module_called_twice_gives_one_finding_with_two_occurrences() {
    let root = r#"module "a" {
  source = "./modules/bucket"
}

module "b" {
  source = "./modules/bucket"
}
"#;
    let out = scan(
        &[("main.tf", root), ("modules/bucket/main.tf", BUCKET_MODULE)],
        &[("policies/naming.toml", EMPTY_NAME)],
    );

    assert_eq!(out.roots, vec![RepoPath::root()]);
    let failed: Vec<_> = out.results.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].range.as_ref().map(|r| r.filename.clone()),
        Some(RepoPath::new("modules/bucket/main.tf"))
    );

    let sites: Vec<(&str, &str, u32)> = failed[0]
        .occurrences
        .iter()
        .map(|o| (o.resource.as_str(), o.range.filename.as_str(), o.range.start_line))
        .collect();
    assert_eq!(sites, vec![("module.a", "main.tf", 1), ("module.b", "main.tf", 5)]);
}

#[test]
fn namespace_exception_moves_the_result_to_ignored() {
    let policy = r#"
package = "defsec.test"
schema = "cloud"

[metadata]
id = "DS-TEST"
title = "Always fails"

[[rule]]
name = "deny"
each = "input.resource.aws_s3_bucket[*]"
when = { path = "each.__kind", op = "eq", value = "resource" }
message = "fail"
"#;
    let exceptions = r#"
package = "namespace.exceptions"

[[exception]]
namespaces = ["defsec"]
"#;
    let out = scan(
        &[("main.tf", BUCKET_MODULE)],
        &[("policies/test.toml", policy), ("policies/exceptions.toml", exceptions)],
    );

    assert_eq!(out.results.failed().count(), 0);
    assert_eq!(out.results.passed().count(), 0);
    let ignored: Vec<_> = out.results.ignored().collect();
    assert_eq!(ignored.len(), 1);
    assert_eq!(ignored[0].status(), Status::Ignored);
    assert_eq!(ignored[0].namespace, "defsec.test");
}

#[test]
fn empty_module_source_is_skipped_and_siblings_still_report() {
    let root = r#"module "broken" {
  source = ""
}

module "ok" {
  source = "./modules/bucket"
}
"#;
    let out = scan(
        &[("main.tf", root), ("modules/bucket/main.tf", BUCKET_MODULE)],
        &[("policies/naming.toml", EMPTY_NAME)],
    );

    assert_eq!(out.skipped_modules.len(), 1);
    let skipped = &out.skipped_modules[0];
    assert_eq!(skipped.address, "module.broken");
    assert_eq!(skipped.range.filename, RepoPath::new("main.tf"));
    assert!(skipped.reason.contains("main.tf:1-3"), "{}", skipped.reason);

    let failed: Vec<_> = out.results.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].resource.as_deref(), Some("module.ok.aws_s3_bucket.this"));
}

#[test]
fn modules_with_zero_count_are_pruned() {
    let root = r#"module "off" {
  source = "./modules/bucket"
  count  = 0
}
"#;
    let out = scan(
        &[("main.tf", root), ("modules/bucket/main.tf", BUCKET_MODULE)],
        &[("policies/naming.toml", EMPTY_NAME)],
    );

    assert_eq!(out.results.failed().count(), 0);
    assert!(out.results.iter().all(|f| f.resource.is_none()));
}

#[test]
fn child_outputs_reach_parent_resources() {
    let root = r#"module "naming" {
  source = "./naming"
  prefix = ""
}

resource "aws_s3_bucket" "logs" {
  bucket = module.naming.name
}
"#;
    let naming = r#"variable "prefix" {}

output "name" {
  value = var.prefix
}
"#;
    let out = scan(
        &[("main.tf", root), ("naming/main.tf", naming)],
        &[("policies/naming.toml", EMPTY_NAME)],
    );

    let failed: Vec<_> = out.results.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].resource.as_deref(), Some("aws_s3_bucket.logs"));
}

#[test]
fn unresolved_attributes_count_as_empty() {
    let root = r#"variable "name" {}

resource "aws_s3_bucket" "this" {
  bucket = var.name
}
"#;
    let out = scan(&[("main.tf", root)], &[("policies/naming.toml", EMPTY_NAME)]);

    let failed: Vec<_> = out.results.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].resource.as_deref(), Some("aws_s3_bucket.this"));
    assert_eq!(out.results.passed().count(), 0);
}

#[test]
fn huge_counts_do_not_exhaust_the_scan() {
    let root = r#"resource "aws_s3_bucket" "this" {
  count  = 100000000
  bucket = ""
}
"#;
    let out = scan(&[("main.tf", root)], &[("policies/naming.toml", EMPTY_NAME)]);

    let failed: Vec<_> = out.results.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(out.unconverged_modules, vec![RepoPath::root().to_string()]);
}

#[test]
fn dynamic_titles_follow_each_root_module() {
    let policy = r#"
package = "users.public"
schema = "cloud"

[metadata]
id = "USR-002"
title = "Public bucket"

[metadata.dynamic]
title = "Bucket {{ each.bucket }} is public"

[[rule]]
name = "deny_public"
each = "input.resource.aws_s3_bucket[*]"
when = { path = "each.acl", op = "eq", value = "public-read" }
message = "bucket is public"
cause = "each.acl"
"#;
    let bucket = |name: &str| format!("resource \"aws_s3_bucket\" \"this\" {{\n  bucket = \"{name}\"\n  acl    = \"public-read\"\n}}\n");
    let alpha = bucket("alpha");
    let beta = bucket("beta");
    let out = scan(
        &[("envs/a/main.tf", alpha.as_str()), ("envs/b/main.tf", beta.as_str())],
        &[("policies/public.toml", policy)],
    );

    assert_eq!(out.roots, vec![RepoPath::new("envs/a"), RepoPath::new("envs/b")]);
    let mut titles: Vec<&str> = out.results.failed().map(|f| f.rule.title.as_str()).collect();
    titles.sort();
    assert_eq!(titles, vec!["Bucket alpha is public", "Bucket beta is public"]);

    let finding = out.results.failed().next().expect("finding");
    let causes: Vec<u32> = finding.code.iter().filter(|l| l.is_cause).map(|l| l.number).collect();
    assert_eq!(causes, vec![3]);
}

#[test]
fn skipped_directories_are_not_scanned() {
    let mut scan = Scan::new(
        &[("main.tf", "resource \"aws_s3_bucket\" \"ok\" {\n  bucket = \"ok\"\n}\n"), ("legacy/main.tf", BUCKET_MODULE)],
        &[("policies/naming.toml", EMPTY_NAME)],
    );
    scan.overrides.skip_dirs = vec!["legacy".to_string()];
    let out = scan.run().expect("scan");

    assert_eq!(out.roots, vec![RepoPath::root()]);
    assert_eq!(out.results.failed().count(), 0);
    assert_eq!(out.results.passed().count(), 1);
}

#[test]
fn embedded_and_native_checks_run_by_default() {
    let mut scan = Scan::new(
        &[(
            "main.tf",
            "resource \"aws_s3_bucket\" \"b\" {\n  bucket = \"logs\"\n  acl    = \"public-read\"\n}\n",
        )],
        &[("policies/naming.toml", EMPTY_NAME)],
    );
    scan.config = "";
    let out = scan.run().expect("scan");

    let native = out
        .results
        .failed()
        .find(|f| f.rule.id == "IAC-AWS-0001")
        .expect("native check finding");
    assert_eq!(native.range.as_ref().map(|r| r.start_line), Some(3));
    assert!(native.code.iter().any(|l| l.is_cause && l.content.contains("public-read")));
    assert!(!out.content_key.is_empty());
}

#[test]
fn content_key_is_stable_across_runs() {
    let first = scan(&[("main.tf", BUCKET_MODULE)], &[("policies/naming.toml", EMPTY_NAME)]);
    let second = scan(&[("main.tf", BUCKET_MODULE)], &[("policies/naming.toml", EMPTY_NAME)]);
    assert_eq!(first.content_key, second.content_key);
    assert_eq!(first.results.as_slice()[0].fingerprint, second.results.as_slice()[0].fingerprint);
}

#[test]
fn invalid_config_is_reported_with_context() {
    let mut scan = Scan::new(&[("main.tf", BUCKET_MODULE)], &[]);
    scan.config = "no_such_field = true\n";
    let err = scan.run().expect_err("config error");
    assert!(err.to_string().contains("parse config"));
}

#[test]
fn cancelled_scans_abort() {
    let scan = Scan::new(&[("main.tf", BUCKET_MODULE)], &[("policies/naming.toml", EMPTY_NAME)]);
    scan.cancel.cancel();
    let err = scan.run().expect_err("cancelled");
    assert!(err.chain().any(|e| e.to_string().contains("cancelled")), "{err:#}");
}
