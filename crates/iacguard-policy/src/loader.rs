//! Collects rule files and data documents into a [`PolicySet`].

use crate::condition::Library;
use crate::document::RuleFile;
use crate::engine::EngineOptions;
use crate::error::{CompileError, LoadError, PolicyError};
use crate::evaluator::{PolicyEvaluator, PolicySource};
use crate::native::native_checks;
use crate::policy::{Exception, ExceptionKind, compile_file, define_names};
use iacguard_fs::{FileSystem, WalkError};
use iacguard_types::{CancellationToken, RepoPath};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

const RULE_FILE_SUFFIX: &str = ".toml";

const EMBEDDED_LIBRARIES: &[(&str, &str)] = &[("lib/aws.toml", include_str!("../embedded/lib/aws.toml"))];

const EMBEDDED_POLICIES: &[(&str, &str)] = &[
    ("policies/ec2_imds.toml", include_str!("../embedded/policies/ec2_imds.toml")),
    ("policies/s3_grants.toml", include_str!("../embedded/policies/s3_grants.toml")),
    (
        "policies/s3_legacy_logging.toml",
        include_str!("../embedded/policies/s3_legacy_logging.toml"),
    ),
    ("policies/s3_versioning.toml", include_str!("../embedded/policies/s3_versioning.toml")),
    ("policies/sg_open_ingress.toml", include_str!("../embedded/policies/sg_open_ingress.toml")),
];

/// A directory on some filesystem.
#[derive(Clone)]
pub struct SourceDir {
    pub fs: Arc<dyn FileSystem>,
    pub path: RepoPath,
}

impl SourceDir {
    pub fn new(fs: Arc<dyn FileSystem>, path: RepoPath) -> Self {
        Self { fs, path }
    }
}

impl fmt::Debug for SourceDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.fs.location(), self.path)
    }
}

#[derive(Clone, Debug, Default)]
pub struct PolicySources {
    pub policy_dirs: Vec<SourceDir>,
    pub data_dirs: Vec<SourceDir>,
}

/// Everything the engine evaluates with.
#[derive(Debug, Default)]
pub struct PolicySet {
    pub policies: Vec<Arc<dyn PolicyEvaluator>>,
    pub namespace_exceptions: Vec<Exception>,
    pub rule_exceptions: Vec<Exception>,
    pub library: Library,
    pub data: Value,
    /// sha256 over the sorted policy sources and data documents.
    pub content_key: String,
    pub compile_errors: Vec<CompileError>,
}

struct SourceText {
    source: PolicySource,
    text: String,
}

pub fn load_policies(
    sources: &PolicySources,
    options: &EngineOptions,
    cancel: &CancellationToken,
) -> Result<PolicySet, PolicyError> {
    let mut texts = Vec::new();
    if options.embedded_libraries {
        texts.extend(embedded(EMBEDDED_LIBRARIES));
    }
    if options.embedded_policies {
        texts.extend(embedded(EMBEDDED_POLICIES));
    }
    for dir in &sources.policy_dirs {
        texts.extend(read_dir_sources(dir, cancel)?);
    }

    let mut data_texts = Vec::new();
    for dir in &sources.data_dirs {
        data_texts.extend(read_data_sources(dir, cancel)?);
    }
    let content_key = content_key(&texts, &data_texts);

    let mut set = PolicySet {
        data: merge_data(&data_texts)?,
        content_key,
        ..PolicySet::default()
    };

    let mut parsed = Vec::new();
    for text in texts {
        cancel.check()?;
        match RuleFile::parse(&text.text) {
            Ok(file) => parsed.push((text.source, file)),
            Err(message) => {
                warn!("skipping unparsable policy {}: {}", text.source, message);
                set.compile_errors.push(CompileError {
                    path: text.source.to_string(),
                    message,
                });
            }
        }
    }

    let known: BTreeSet<String> = parsed.iter().flat_map(|(_, file)| define_names(file)).collect();
    for (source, file) in parsed {
        let compiled = compile_file(&file, source, &known)?;
        set.compile_errors.extend(compiled.errors);
        for (name, condition) in compiled.defines {
            set.library.insert(name, condition);
        }
        for exception in compiled.exceptions {
            match exception.kind {
                ExceptionKind::Namespaces(_) => set.namespace_exceptions.push(exception),
                ExceptionKind::Rules(_) => set.rule_exceptions.push(exception),
            }
        }
        if let Some(policy) = compiled.policy {
            set.policies.push(Arc::new(policy));
        }
    }

    if !options.rules_only {
        set.policies.extend(native_checks());
    }

    debug!(
        "loaded {} policies, {} predicates, {} exceptions ({} compile errors)",
        set.policies.len(),
        set.library.len(),
        set.namespace_exceptions.len() + set.rule_exceptions.len(),
        set.compile_errors.len()
    );
    Ok(set)
}

fn embedded(files: &[(&str, &str)]) -> impl Iterator<Item = SourceText> {
    files.iter().map(|(path, text)| SourceText {
        source: PolicySource::Embedded((*path).to_string()),
        text: (*text).to_string(),
    })
}

fn walk(dir: &SourceDir, cancel: &CancellationToken) -> Result<Vec<RepoPath>, PolicyError> {
    dir.fs.walk(&dir.path, cancel).map_err(|e| match e {
        WalkError::Cancelled(c) => PolicyError::Cancelled(c),
        WalkError::Io { path, source } => PolicyError::Load(LoadError::Read {
            path: format!("{}/{}", dir.fs.location(), path),
            message: source.to_string(),
        }),
    })
}

fn read(dir: &SourceDir, path: &RepoPath) -> Result<String, LoadError> {
    dir.fs.read_to_string(path).map_err(|e| LoadError::Read {
        path: format!("{}/{}", dir.fs.location(), path),
        message: e.to_string(),
    })
}

fn read_dir_sources(dir: &SourceDir, cancel: &CancellationToken) -> Result<Vec<SourceText>, PolicyError> {
    let mut out = Vec::new();
    for path in walk(dir, cancel)? {
        if !path.as_str().ends_with(RULE_FILE_SUFFIX) {
            continue;
        }
        out.push(SourceText {
            text: read(dir, &path)?,
            source: PolicySource::User {
                location: dir.fs.location(),
                path: path.to_string(),
            },
        });
    }
    Ok(out)
}

#[derive(Debug)]
struct DataText {
    name: String,
    json: bool,
    text: String,
}

fn read_data_sources(dir: &SourceDir, cancel: &CancellationToken) -> Result<Vec<DataText>, PolicyError> {
    let mut out = Vec::new();
    for path in walk(dir, cancel)? {
        let json = path.as_str().ends_with(".json");
        if !json && !path.as_str().ends_with(".toml") {
            continue;
        }
        out.push(DataText {
            name: format!("{}/{}", dir.fs.location(), path),
            json,
            text: read(dir, &path)?,
        });
    }
    Ok(out)
}

/// Data documents deep-merged into one object, later documents winning on conflicts.
fn merge_data(texts: &[DataText]) -> Result<Value, LoadError> {
    let mut root = Value::Object(Map::new());
    for data in texts {
        let value: Value = if data.json {
            serde_json::from_str(&data.text).map_err(|e| e.to_string())
        } else {
            toml::from_str(&data.text).map_err(|e| e.to_string())
        }
        .map_err(|message| LoadError::Data {
            path: data.name.clone(),
            message,
        })?;
        if !value.is_object() {
            return Err(LoadError::Data {
                path: data.name.clone(),
                message: "top level must be an object".to_string(),
            });
        }
        deep_merge(&mut root, value);
    }
    Ok(root)
}

fn deep_merge(into: &mut Value, from: Value) {
    match (into, from) {
        (Value::Object(into), Value::Object(from)) => {
            for (key, value) in from {
                match into.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        into.insert(key, value);
                    }
                }
            }
        }
        (into, from) => *into = from,
    }
}

fn content_key(policies: &[SourceText], data: &[DataText]) -> String {
    let mut parts: Vec<(String, &str)> = policies
        .iter()
        .map(|p| (p.source.to_string(), p.text.as_str()))
        .chain(data.iter().map(|d| (format!("data:{}", d.name), d.text.as_str())))
        .collect();
    parts.sort();

    let mut hasher = Sha256::new();
    for (name, text) in parts {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iacguard_fs::MemFs;

    fn options() -> EngineOptions {
        EngineOptions {
            embedded_policies: false,
            embedded_libraries: false,
            rules_only: true,
            ..EngineOptions::default()
        }
    }

    fn dir(files: &[(&str, &str)]) -> SourceDir {
        SourceDir::new(Arc::new(MemFs::from_files(files.iter().copied())), RepoPath::new("policies"))
    }

    #[test]
    fn embedded_sources_compile_cleanly() {
        let options = EngineOptions {
            rules_only: true,
            ..EngineOptions::default()
        };
        let set = load_policies(&PolicySources::default(), &options, &CancellationToken::new()).expect("load");
        assert!(set.compile_errors.is_empty(), "{:?}", set.compile_errors);
        assert_eq!(set.policies.len(), EMBEDDED_POLICIES.len());
        assert!(set.library.get("lib.aws.public_acl").is_some());
    }

    #[test]
    fn native_checks_follow_rules_only() {
        let options = EngineOptions {
            embedded_policies: false,
            rules_only: false,
            ..EngineOptions::default()
        };
        let set = load_policies(&PolicySources::default(), &options, &CancellationToken::new()).expect("load");
        assert_eq!(set.policies.len(), 2);
        assert!(set.policies.iter().all(|p| p.info().is_native()));
    }

    #[test]
    fn user_libraries_and_rules_link_across_files() {
        let sources = PolicySources {
            policy_dirs: vec![dir(&[
                ("policies/lib.toml", "package = \"lib.users\"\n[[define]]\nname = \"is_prod\"\nwhen = { path = \"each\", op = \"eq\", value = \"prod\" }\n"),
                ("policies/rule.toml", "package = \"users.env\"\n[[rule]]\nname = \"deny_prod\"\neach = \"input.resource.x[*]\"\nwhen = { call = \"lib.users.is_prod\", with = \"each.env\" }\n"),
                ("policies/README.md", "not a policy"),
                ("policies/broken.toml", "package = "),
            ])],
            data_dirs: Vec::new(),
        };
        let set = load_policies(&sources, &options(), &CancellationToken::new()).expect("load");
        assert_eq!(set.policies.len(), 1);
        assert_eq!(set.compile_errors.len(), 1);
        assert!(set.compile_errors[0].path.ends_with("policies/broken.toml"));
    }

    #[test]
    fn data_documents_merge_and_feed_the_content_key() {
        let policies = dir(&[("policies/p.toml", "package = \"users.p\"\n[[rule]]\nname = \"deny\"\n")]);
        let data = SourceDir::new(
            Arc::new(MemFs::from_files([
                ("data/a.json", r#"{"regions": {"allowed": ["eu-west-1"]}}"#),
                ("data/b.toml", "[regions]\ndefault = \"eu-west-1\"\n"),
            ])),
            RepoPath::new("data"),
        );
        let sources = PolicySources {
            policy_dirs: vec![policies.clone()],
            data_dirs: vec![data],
        };
        let set = load_policies(&sources, &options(), &CancellationToken::new()).expect("load");
        assert_eq!(set.data["regions"]["allowed"][0], "eu-west-1");
        assert_eq!(set.data["regions"]["default"], "eu-west-1");

        let again = load_policies(&sources, &options(), &CancellationToken::new()).expect("load");
        assert_eq!(set.content_key, again.content_key);
        let without_data = PolicySources {
            policy_dirs: vec![policies],
            data_dirs: Vec::new(),
        };
        let other = load_policies(&without_data, &options(), &CancellationToken::new()).expect("load");
        assert_ne!(set.content_key, other.content_key);
    }

    #[test]
    fn invalid_data_is_a_load_error() {
        let data = SourceDir::new(Arc::new(MemFs::from_files([("data/a.json", "{")])), RepoPath::new("data"));
        let sources = PolicySources {
            policy_dirs: Vec::new(),
            data_dirs: vec![data],
        };
        let err = load_policies(&sources, &options(), &CancellationToken::new()).expect_err("bad data");
        assert!(matches!(err, PolicyError::Load(LoadError::Data { .. })));
    }
}
