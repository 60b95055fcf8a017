use crate::range::SourceRange;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unknown => "UNKNOWN",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UNKNOWN" => Ok(Severity::Unknown),
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!(
                "unknown severity: {other} (expected LOW|MEDIUM|HIGH|CRITICAL|UNKNOWN)"
            )),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw pass/fail determination of a rule, before exceptions are applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Suppression {
    Namespace,
    Rule,
}

/// Reported status. Both suppression kinds collapse into `Ignored`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Failed,
    Ignored,
    Passed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RuleMetadata {
    /// Stable identifier; falls back to the namespace when a rule declares none.
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub avd_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub short_code: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub recommended_actions: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(default)]
    pub deprecated: bool,
}

/// One call site through which a finding's resource was reached.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Occurrence {
    /// Address of the module instance that was called, e.g. `module.bucket[0]`.
    pub resource: String,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CodeLine {
    pub number: u32,
    pub content: String,
    pub is_cause: bool,
    pub first_cause: bool,
    pub last_cause: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    pub rule: RuleMetadata,
    pub namespace: String,
    /// Name of the rule inside its namespace, e.g. `deny_public_acl`.
    pub rule_name: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppression: Option<Suppression>,
    #[serde(default)]
    pub message: String,
    /// True for failures raised by `warn*` rules.
    #[serde(default)]
    pub warning: bool,

    /// Attributed source range: the cause when known, else the owning block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<SourceRange>,
    /// Range of the block that owns the cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_range: Option<SourceRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub occurrences: Vec<Occurrence>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code: Vec<CodeLine>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traces: Vec<String>,

    /// Stable identifier intended for dedup and trending.
    #[serde(default)]
    pub fingerprint: String,
}

impl Finding {
    pub fn status(&self) -> Status {
        match (self.suppression, self.outcome) {
            (Some(_), _) => Status::Ignored,
            (None, Outcome::Fail) => Status::Failed,
            (None, Outcome::Pass) => Status::Passed,
        }
    }
}

/// Ordered collection of findings produced by one scan.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Results(Vec<Finding>);

impl Results {
    pub fn new(findings: Vec<Finding>) -> Self {
        Self(findings)
    }

    pub fn failed(&self) -> impl Iterator<Item = &Finding> {
        self.with_status(Status::Failed)
    }

    pub fn passed(&self) -> impl Iterator<Item = &Finding> {
        self.with_status(Status::Passed)
    }

    pub fn ignored(&self) -> impl Iterator<Item = &Finding> {
        self.with_status(Status::Ignored)
    }

    fn with_status(&self, status: Status) -> impl Iterator<Item = &Finding> {
        self.0.iter().filter(move |f| f.status() == status)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Finding> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Finding> {
        self.0
    }

    pub fn as_slice(&self) -> &[Finding] {
        &self.0
    }
}

impl IntoIterator for Results {
    type Item = Finding;
    type IntoIter = std::vec::IntoIter<Finding>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Results {
    type Item = &'a Finding;
    type IntoIter = std::slice::Iter<'a, Finding>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(outcome: Outcome, suppression: Option<Suppression>) -> Finding {
        Finding {
            rule: RuleMetadata {
                id: "TEST-001".to_string(),
                ..RuleMetadata::default()
            },
            namespace: "defsec.test".to_string(),
            rule_name: "deny".to_string(),
            outcome,
            suppression,
            message: String::new(),
            warning: false,
            range: None,
            resource_range: None,
            resource: None,
            occurrences: Vec::new(),
            code: Vec::new(),
            traces: Vec::new(),
            fingerprint: String::new(),
        }
    }

    #[test]
    fn every_finding_lands_in_exactly_one_bucket() {
        let results = Results::new(vec![
            finding(Outcome::Fail, None),
            finding(Outcome::Pass, None),
            finding(Outcome::Fail, Some(Suppression::Namespace)),
            finding(Outcome::Pass, Some(Suppression::Rule)),
        ]);

        assert_eq!(results.failed().count(), 1);
        assert_eq!(results.passed().count(), 1);
        assert_eq!(results.ignored().count(), 2);
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn suppression_keeps_raw_outcome() {
        let f = finding(Outcome::Fail, Some(Suppression::Rule));
        assert_eq!(f.status(), Status::Ignored);
        assert_eq!(f.outcome, Outcome::Fail);
    }

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!("high".parse::<Severity>(), Ok(Severity::High));
        assert_eq!("CRITICAL".parse::<Severity>(), Ok(Severity::Critical));
        assert!("urgent".parse::<Severity>().is_err());
        assert!(Severity::Critical > Severity::Low);
    }
}
