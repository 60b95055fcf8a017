use iacguard_types::RepoPath;
use iacguard_types::ids::INPUT_TYPE_CLOUD;
use serde_json::Value;

/// Provider/service pair describing what an input contains, e.g. `aws`/`s3`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subtype {
    pub provider: Option<String>,
    pub service: Option<String>,
}

impl Subtype {
    pub fn new(provider: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            service: Some(service.into()),
        }
    }
}

/// One document handed to the policies.
#[derive(Clone, Debug, PartialEq)]
pub struct Input {
    /// Root module directory (or file) the document was built from.
    pub path: RepoPath,
    pub kind: String,
    pub subtypes: Vec<Subtype>,
    pub contents: Value,
}

impl Input {
    pub fn cloud(path: RepoPath, subtypes: Vec<Subtype>, contents: Value) -> Self {
        Self {
            path,
            kind: INPUT_TYPE_CLOUD.to_string(),
            subtypes,
            contents,
        }
    }
}
