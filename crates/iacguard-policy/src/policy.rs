//! Compilation of rule files into policies, exceptions and library predicates.

use crate::condition::{Compiler, Condition, EvalCtx, Operand};
use crate::document::{ExceptionDoc, MetadataDoc, RuleDoc, RuleFile};
use crate::error::{CompileError, LoadError, RuleError};
use crate::evaluator::{
    EvalEnv, PolicyEvaluator, PolicyInfo, PolicySource, RawOutcome, RuleKind, hit_on_block,
};
use crate::input::Input;
use crate::path::{Bindings, Path, Root};
use crate::selector::Selector;
use crate::template::Template;
use iacguard_types::ids::{INPUT_TYPE_CLOUD, INPUT_TYPE_DEFSEC, NAMESPACE_EXCEPTIONS, NAMESPACE_LIB, namespace_matches};
use iacguard_types::{RepoPath, RuleMetadata, Severity, SourceRange};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::warn;

/// Top-level fields of the evaluated cloud document.
const CLOUD_FIELDS: &[&str] = &[
    "resource", "data", "provider", "module", "variable", "output", "locals",
];

const DYNAMIC_FIELDS: &[&str] = &[
    "title",
    "description",
    "recommended_actions",
    "severity",
    "short_code",
];

#[derive(Clone, Debug)]
struct Rule {
    name: String,
    kind: RuleKind,
    each: Option<Path>,
    when: Option<Condition>,
    message: Option<Template>,
    cause: Option<Path>,
    location: Option<Path>,
}

/// A compiled declarative policy.
#[derive(Clone, Debug)]
pub struct Policy {
    info: PolicyInfo,
    dynamic: Vec<(String, Template)>,
    rules: Vec<Rule>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExceptionKind {
    Namespaces(Vec<String>),
    Rules(Vec<String>),
}

/// Suppression predicate declared in a rule file.
#[derive(Clone, Debug)]
pub struct Exception {
    pub package: String,
    pub kind: ExceptionKind,
    when: Option<Condition>,
}

impl Exception {
    /// True when this exception names `namespace` (exact or dotted prefix).
    pub fn names_namespace(&self, namespace: &str) -> bool {
        match &self.kind {
            ExceptionKind::Namespaces(prefixes) => {
                prefixes.iter().any(|p| namespace_matches(namespace, p))
            }
            ExceptionKind::Rules(_) => false,
        }
    }

    /// True when this exception names `rule_name`, with or without its kind prefix.
    pub fn names_rule(&self, rule_name: &str) -> bool {
        let ExceptionKind::Rules(rules) = &self.kind else {
            return false;
        };
        let bare = ["deny_", "warn_", "allow_"]
            .iter()
            .find_map(|prefix| rule_name.strip_prefix(prefix));
        rules
            .iter()
            .any(|r| r == rule_name || bare.is_some_and(|b| b == r))
    }

    /// Evaluates the exception's condition against the whole input.
    pub fn holds(&self, input: &Input, env: &EvalEnv<'_>) -> Result<bool, RuleError> {
        let Some(when) = &self.when else {
            return Ok(true);
        };
        let bindings = Bindings {
            input: &input.contents,
            each: &input.contents,
            data: env.data,
        };
        let cx = EvalCtx {
            policy: &self.package,
            rule: "exception",
            library: env.library,
            depth: 0,
        };
        when.eval(&bindings, &cx)
    }
}

/// Everything one rule file contributes.
#[derive(Debug, Default)]
pub struct CompiledFile {
    pub policy: Option<Policy>,
    pub exceptions: Vec<Exception>,
    pub defines: Vec<(String, Condition)>,
    pub errors: Vec<CompileError>,
}

/// Names of the predicates a file defines, qualified by its package.
pub fn define_names(file: &RuleFile) -> impl Iterator<Item = String> + '_ {
    file.defines
        .iter()
        .map(|d| format!("{}.{}", file.package, d.name))
}

/// Compiles one parsed file. Malformed rules are dropped and reported in
/// [`CompiledFile::errors`]; a schema violation fails the whole load.
pub fn compile_file(
    file: &RuleFile,
    source: PolicySource,
    known: &BTreeSet<String>,
) -> Result<CompiledFile, LoadError> {
    let origin = source.to_string();
    let compiler = Compiler {
        package: &file.package,
        known,
    };
    let mut out = CompiledFile::default();
    let error = |message: String| {
        warn!("skipping malformed rule in {}: {}", origin, message);
        out_error(&origin, message)
    };
    let mut errors = Vec::new();

    if file.package.trim().is_empty() {
        errors.push(error("package must not be empty".to_string()));
        out.errors = errors;
        return Ok(out);
    }

    for define in &file.defines {
        match compiler.compile(&define.when) {
            Ok(condition) => out
                .defines
                .push((format!("{}.{}", file.package, define.name), condition)),
            Err(message) => errors.push(error(format!("define {}: {message}", define.name))),
        }
    }

    for doc in &file.exceptions {
        match compile_exception(&compiler, &file.package, doc) {
            Ok(exception) => out.exceptions.push(exception),
            Err(message) => errors.push(error(format!("exception: {message}"))),
        }
    }

    let is_library = file.package == NAMESPACE_LIB || namespace_matches(&file.package, NAMESPACE_LIB);
    if is_library || file.package == NAMESPACE_EXCEPTIONS || file.rules.is_empty() {
        if is_library && !file.rules.is_empty() {
            errors.push(error(format!("library package {} cannot declare rules", file.package)));
        }
        out.errors = errors;
        return Ok(out);
    }

    let mut rules = Vec::new();
    for doc in &file.rules {
        match compile_rule(&compiler, doc) {
            Ok(rule) => rules.push(rule),
            Err(message) => errors.push(error(format!("rule {}: {message}", doc.name))),
        }
    }

    if let Some(schema) = &file.schema {
        check_schema(&origin, schema, &rules)?;
    }

    let metadata = match compile_metadata(&file.package, &file.metadata) {
        Ok(metadata) => metadata,
        Err(message) => {
            errors.push(error(message));
            out.errors = errors;
            return Ok(out);
        }
    };
    let mut dynamic = Vec::new();
    for (field, text) in &file.metadata.dynamic {
        if !DYNAMIC_FIELDS.contains(&field.as_str()) {
            errors.push(error(format!("dynamic metadata field {field:?} is not supported")));
            continue;
        }
        match Template::parse(text) {
            Ok(template) => dynamic.push((field.clone(), template)),
            Err(message) => errors.push(error(format!("dynamic {field}: {message}"))),
        }
    }

    if !rules.is_empty() {
        out.policy = Some(Policy {
            info: PolicyInfo {
                namespace: file.package.clone(),
                metadata,
                schema: file.schema.clone(),
                selectors: file.input.selector.iter().map(Selector::from).collect(),
                source,
                rule_names: rules.iter().map(|r| r.name.clone()).collect(),
            },
            dynamic,
            rules,
        });
    }
    out.errors = errors;
    Ok(out)
}

fn out_error(origin: &str, message: String) -> CompileError {
    CompileError {
        path: origin.to_string(),
        message,
    }
}

fn compile_exception(compiler: &Compiler<'_>, package: &str, doc: &ExceptionDoc) -> Result<Exception, String> {
    let kind = match (doc.rules.is_empty(), doc.namespaces.is_empty()) {
        (false, true) if package != NAMESPACE_EXCEPTIONS => ExceptionKind::Rules(doc.rules.clone()),
        (true, false) if package == NAMESPACE_EXCEPTIONS => ExceptionKind::Namespaces(doc.namespaces.clone()),
        (true, false) => {
            return Err(format!("namespace exceptions belong in package {NAMESPACE_EXCEPTIONS}"));
        }
        (false, true) => return Err(format!("package {NAMESPACE_EXCEPTIONS} only takes namespaces")),
        _ => return Err("exception needs exactly one of rules or namespaces".to_string()),
    };
    let when = doc.when.as_ref().map(|w| compiler.compile(w)).transpose()?;
    Ok(Exception {
        package: package.to_string(),
        kind,
        when,
    })
}

fn compile_rule(compiler: &Compiler<'_>, doc: &RuleDoc) -> Result<Rule, String> {
    let kind = RuleKind::from_rule_name(&doc.name)
        .ok_or_else(|| "rule name must start with deny, warn or allow".to_string())?;
    Ok(Rule {
        name: doc.name.clone(),
        kind,
        each: doc.each.as_deref().map(Path::parse).transpose()?,
        when: doc.when.as_ref().map(|w| compiler.compile(w)).transpose()?,
        message: doc.message.as_deref().map(Template::parse).transpose()?,
        cause: doc.cause.as_deref().map(Path::parse).transpose()?,
        location: doc.location.as_deref().map(Path::parse).transpose()?,
    })
}

fn compile_metadata(package: &str, doc: &MetadataDoc) -> Result<RuleMetadata, String> {
    let severity = doc
        .severity
        .as_deref()
        .map(str::parse::<Severity>)
        .transpose()?
        .unwrap_or_default();
    Ok(RuleMetadata {
        id: if doc.id.is_empty() {
            package.to_string()
        } else {
            doc.id.clone()
        },
        avd_id: doc.avd_id.clone(),
        short_code: doc.short_code.clone(),
        title: doc.title.clone(),
        description: doc.description.clone(),
        recommended_actions: doc.recommended_actions.clone(),
        severity,
        references: doc.references.clone(),
        provider: doc.provider.clone(),
        service: doc.service.clone(),
        deprecated: doc.deprecated,
    })
}

fn check_schema(origin: &str, schema: &str, rules: &[Rule]) -> Result<(), LoadError> {
    if schema != INPUT_TYPE_CLOUD && schema != INPUT_TYPE_DEFSEC {
        return Err(LoadError::Schema {
            path: origin.to_string(),
            schema: schema.to_string(),
            message: "unknown schema".to_string(),
        });
    }

    let mut fields = BTreeSet::new();
    for rule in rules {
        let paths = [&rule.each, &rule.cause, &rule.location];
        for path in paths.into_iter().flatten() {
            input_field(path, &mut fields);
        }
        if let Some(when) = &rule.when {
            condition_fields(when, &mut fields);
        }
    }

    match fields.iter().find(|f| !CLOUD_FIELDS.contains(&f.as_str())) {
        Some(field) => Err(LoadError::Schema {
            path: origin.to_string(),
            schema: schema.to_string(),
            message: format!("input.{field} is not part of the document"),
        }),
        None => Ok(()),
    }
}

fn input_field(path: &Path, out: &mut BTreeSet<String>) {
    if path.root == Root::Input
        && let Some(field) = path.top_field()
    {
        out.insert(field.to_string());
    }
}

fn condition_fields(condition: &Condition, out: &mut BTreeSet<String>) {
    match condition {
        Condition::All(items) | Condition::Any(items) => {
            for item in items {
                condition_fields(item, out);
            }
        }
        Condition::Not(inner) => condition_fields(inner, out),
        Condition::Call { with, .. } => {
            if let Some(with) = with {
                input_field(with, out);
            }
        }
        Condition::Test { path, operand, .. } => {
            input_field(path, out);
            if let Operand::Path(from) = operand {
                input_field(from, out);
            }
        }
    }
}

impl Policy {
    fn outcome(&self, rule: &Rule, bindings: &Bindings<'_>, item: &Value) -> RawOutcome {
        let message = match &rule.message {
            Some(template) => template.render(bindings),
            None if !self.info.metadata.title.is_empty() => self.info.metadata.title.clone(),
            None => rule.name.clone(),
        };
        let cause = rule.cause.as_ref().and_then(|p| p.first(bindings));
        let mut outcome = hit_on_block(&rule.name, rule.kind, message, item, cause);

        if let Some(location) = rule.location.as_ref().and_then(|p| p.first(bindings)) {
            apply_location(&mut outcome, location);
        }
        if !self.dynamic.is_empty() {
            outcome.metadata = Some(self.render_metadata(bindings));
        }
        outcome
    }

    fn render_metadata(&self, bindings: &Bindings<'_>) -> RuleMetadata {
        let mut metadata = self.info.metadata.clone();
        for (field, template) in &self.dynamic {
            let text = template.render(bindings);
            match field.as_str() {
                "title" => metadata.title = text,
                "description" => metadata.description = text,
                "recommended_actions" => metadata.recommended_actions = text,
                "short_code" => metadata.short_code = text,
                "severity" => {
                    if let Ok(severity) = text.parse() {
                        metadata.severity = severity;
                    }
                }
                _ => {}
            }
        }
        metadata
    }
}

/// `{msg, filepath, startline, endline}` overrides the default attribution.
fn apply_location(outcome: &mut RawOutcome, location: &Value) {
    if let Some(msg) = location.get("msg").and_then(Value::as_str) {
        outcome.message = msg.to_string();
    }
    let Some(start) = location.get("startline").and_then(Value::as_u64) else {
        return;
    };
    let end = location
        .get("endline")
        .and_then(Value::as_u64)
        .unwrap_or(start);
    let filename = location
        .get("filepath")
        .and_then(Value::as_str)
        .map(RepoPath::new)
        .or_else(|| outcome.resource_range.as_ref().map(|r| r.filename.clone()));
    if let (Some(filename), Ok(start), Ok(end)) = (filename, u32::try_from(start), u32::try_from(end)) {
        outcome.range = Some(SourceRange::new(filename, start, end));
    }
}

impl PolicyEvaluator for Policy {
    fn info(&self) -> &PolicyInfo {
        &self.info
    }

    fn evaluate(&self, input: &Input, env: &EvalEnv<'_>) -> Result<Vec<RawOutcome>, RuleError> {
        let root = Bindings {
            input: &input.contents,
            each: &input.contents,
            data: env.data,
        };

        let mut hits = Vec::new();
        for rule in &self.rules {
            let cx = EvalCtx {
                policy: &self.info.namespace,
                rule: &rule.name,
                library: env.library,
                depth: 0,
            };
            let items = match &rule.each {
                Some(each) => each.resolve(&root),
                None => vec![&input.contents],
            };

            for item in items {
                let bindings = root.with_each(item);
                let holds = match &rule.when {
                    Some(when) => when.eval(&bindings, &cx)?,
                    None => true,
                };
                let hit = match rule.kind {
                    RuleKind::Allow => !holds,
                    RuleKind::Deny | RuleKind::Warn => holds,
                };
                env.trace(|| {
                    let target = item
                        .get("__address")
                        .and_then(Value::as_str)
                        .unwrap_or("input");
                    format!(
                        "{}.{} on {}: {}",
                        self.info.namespace,
                        rule.name,
                        target,
                        if hit { "hit" } else { "no hit" }
                    )
                });
                if hit {
                    hits.push(self.outcome(rule, &bindings, item));
                }
            }
        }
        Ok(hits)
    }
}
