//! Exception resolution and finding construction.

use crate::error::RuleError;
use crate::evaluator::{EvalEnv, PolicyEvaluator, PolicyInfo, RawOutcome, RuleKind};
use crate::input::Input;
use crate::policy::Exception;
use iacguard_types::{Finding, Outcome, Results, Severity, SourceRange, Status, Suppression};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Exceptions visible to one engine run.
#[derive(Clone, Copy, Debug)]
pub struct Exceptions<'a> {
    pub namespace: &'a [Exception],
    pub rule: &'a [Exception],
}

/// Applies exceptions to the outcomes of one (policy, input) evaluation and builds findings.
/// No hits means one pass result.
pub fn resolve(
    policy: &dyn PolicyEvaluator,
    input: &Input,
    hits: Vec<RawOutcome>,
    exceptions: Exceptions<'_>,
    env: &EvalEnv<'_>,
) -> Result<Vec<Finding>, RuleError> {
    let info = policy.info();
    let outcomes = if hits.is_empty() {
        vec![RawOutcome {
            rule_name: info.pass_rule_name().to_string(),
            ..RawOutcome::default()
        }]
    } else {
        hits
    };

    let namespace_suppressed = namespace_suppressed(info, input, exceptions, env)?;
    let mut findings = Vec::with_capacity(outcomes.len());
    for raw in outcomes {
        let suppression = if namespace_suppressed {
            Some(Suppression::Namespace)
        } else if rule_suppressed(info, &raw.rule_name, input, exceptions, env)? {
            Some(Suppression::Rule)
        } else {
            None
        };
        findings.push(build_finding(info, raw, suppression));
    }
    Ok(findings)
}

fn namespace_suppressed(
    info: &PolicyInfo,
    input: &Input,
    exceptions: Exceptions<'_>,
    env: &EvalEnv<'_>,
) -> Result<bool, RuleError> {
    for exception in exceptions.namespace {
        if exception.names_namespace(&info.namespace) && exception.holds(input, env)? {
            env.trace(|| format!("{}: suppressed by namespace exception", info.namespace));
            return Ok(true);
        }
    }
    Ok(false)
}

fn rule_suppressed(
    info: &PolicyInfo,
    rule_name: &str,
    input: &Input,
    exceptions: Exceptions<'_>,
    env: &EvalEnv<'_>,
) -> Result<bool, RuleError> {
    for exception in exceptions.rule {
        if exception.package == info.namespace
            && exception.names_rule(rule_name)
            && exception.holds(input, env)?
        {
            env.trace(|| format!("{}.{rule_name}: suppressed by rule exception", info.namespace));
            return Ok(true);
        }
    }
    Ok(false)
}

fn build_finding(info: &PolicyInfo, raw: RawOutcome, suppression: Option<Suppression>) -> Finding {
    let rule = raw.metadata.unwrap_or_else(|| info.metadata.clone());
    let mut finding = Finding {
        rule,
        namespace: info.namespace.clone(),
        rule_name: raw.rule_name,
        outcome: if raw.hit { Outcome::Fail } else { Outcome::Pass },
        suppression,
        message: raw.message,
        warning: raw.hit && raw.kind == Some(RuleKind::Warn),
        range: raw.range,
        resource_range: raw.resource_range,
        resource: raw.resource,
        occurrences: raw.occurrences,
        code: Vec::new(),
        traces: Vec::new(),
        fingerprint: String::new(),
    };
    finding.fingerprint = fingerprint(&finding);
    finding
}

/// Stable SHA-256 fingerprint of a finding.
///
/// Identity fields:
/// - rule id
/// - namespace and rule name
/// - resource address (if present)
/// - attributed range (if present)
/// - message
pub fn fingerprint(finding: &Finding) -> String {
    let range = finding.range.as_ref().map(SourceRange::to_string).unwrap_or_default();
    let parts = [
        finding.rule.id.as_str(),
        finding.namespace.as_str(),
        finding.rule_name.as_str(),
        finding.resource.as_deref().unwrap_or_default(),
        range.as_str(),
        finding.message.as_str(),
    ];
    let canonical = parts.join("|");

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Merges findings that share rule id, status, range and message, then sorts.
pub fn finalize(findings: Vec<Finding>) -> Results {
    let mut merged: Vec<Finding> = Vec::with_capacity(findings.len());
    let mut index: HashMap<(String, Status, Option<SourceRange>, String), usize> = HashMap::new();

    for finding in findings {
        let key = (
            finding.rule.id.clone(),
            finding.status(),
            finding.range.clone(),
            finding.message.clone(),
        );
        match index.get(&key) {
            Some(&i) => {
                let existing = &mut merged[i];
                existing.occurrences.extend(finding.occurrences);
                existing.traces.extend(finding.traces);
            }
            None => {
                index.insert(key, merged.len());
                merged.push(finding);
            }
        }
    }

    for finding in &mut merged {
        finding.occurrences.sort();
        finding.occurrences.dedup();
    }
    merged.sort_by(compare_findings);
    Results::new(merged)
}

fn compare_findings(a: &Finding, b: &Finding) -> std::cmp::Ordering {
    // Ordering priority:
    // 1) status (failed -> ignored -> passed)
    // 2) severity (critical first)
    // 3) range.filename (missing last)
    // 4) range.start_line (missing last)
    // 5) rule id
    // 6) resource
    // 7) message
    let location = |f: &Finding| match &f.range {
        Some(r) => (r.filename.as_str().to_string(), r.start_line),
        None => ("~".to_string(), u32::MAX),
    };
    let severity_rank = |sev: Severity| std::cmp::Reverse(sev);
    let (ap, al) = location(a);
    let (bp, bl) = location(b);

    a.status()
        .cmp(&b.status())
        .then(severity_rank(a.rule.severity).cmp(&severity_rank(b.rule.severity)))
        .then(ap.cmp(&bp))
        .then(al.cmp(&bl))
        .then(a.rule.id.cmp(&b.rule.id))
        .then(a.resource.cmp(&b.resource))
        .then(a.message.cmp(&b.message))
}
