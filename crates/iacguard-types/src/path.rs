use camino::{Utf8Path, Utf8PathBuf};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical path relative to the root of a filesystem abstraction.
///
/// Normalization rules are simple and deterministic:
/// - always forward slashes (`/`)
/// - `.` segments are removed and `..` segments collapse their parent
/// - the root itself is spelled `.`
/// - `..` segments that escape the root are kept, see [`RepoPath::escapes_root`]
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct RepoPath(String);

impl Default for RepoPath {
    fn default() -> Self {
        RepoPath::root()
    }
}

impl RepoPath {
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        let raw = s.as_ref().replace('\\', "/");
        let absolute = raw.starts_with('/');

        let mut parts: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => match parts.last() {
                    Some(&last) if last != ".." => {
                        parts.pop();
                    }
                    _ if absolute => {}
                    _ => parts.push(".."),
                },
                other => parts.push(other),
            }
        }

        let joined = parts.join("/");
        if absolute {
            return Self(format!("/{joined}"));
        }
        if joined.is_empty() {
            return Self::root();
        }
        Self(joined)
    }

    pub fn root() -> Self {
        Self(".".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "."
    }

    pub fn escapes_root(&self) -> bool {
        self.0 == ".." || self.0.starts_with("../")
    }

    pub fn to_utf8_pathbuf(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.0.clone())
    }

    pub fn join(&self, segment: &str) -> RepoPath {
        if self.is_root() {
            return RepoPath::new(segment);
        }
        RepoPath::new(format!("{}/{}", self.0, segment))
    }

    /// Parent directory; the parent of a top-level entry is the root.
    pub fn parent(&self) -> RepoPath {
        match self.0.rsplit_once('/') {
            Some(("", _)) => RepoPath::new("/"),
            Some((parent, _)) => RepoPath::new(parent),
            None => RepoPath::root(),
        }
    }

    pub fn file_name(&self) -> &str {
        match self.0.rsplit_once('/') {
            Some((_, name)) => name,
            None => &self.0,
        }
    }

    /// True when `self` is `dir` or lives underneath it.
    pub fn starts_with(&self, dir: &RepoPath) -> bool {
        if dir.is_root() {
            return !self.escapes_root();
        }
        self.0 == dir.0
            || self
                .0
                .strip_prefix(&dir.0)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Path of `self` relative to `dir`, when `self` lives underneath it.
    pub fn strip_prefix(&self, dir: &RepoPath) -> Option<RepoPath> {
        if dir.is_root() {
            return Some(self.clone());
        }
        if self.0 == dir.0 {
            return Some(RepoPath::root());
        }
        self.0
            .strip_prefix(&dir.0)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(RepoPath::new)
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Utf8Path> for RepoPath {
    fn from(value: &Utf8Path) -> Self {
        RepoPath::new(value.as_str())
    }
}

impl From<Utf8PathBuf> for RepoPath {
    fn from(value: Utf8PathBuf) -> Self {
        RepoPath::new(value.as_str())
    }
}

impl From<&str> for RepoPath {
    fn from(value: &str) -> Self {
        RepoPath::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalizes_separators_and_dots() {
        assert_eq!(RepoPath::new("./a/./b").as_str(), "a/b");
        assert_eq!(RepoPath::new("a\\b\\c.tf").as_str(), "a/b/c.tf");
        assert_eq!(RepoPath::new("").as_str(), ".");
        assert_eq!(RepoPath::new("./").as_str(), ".");
    }

    #[test]
    fn parent_segments_collapse() {
        assert_eq!(RepoPath::new("code/example/../modules/x").as_str(), "code/modules/x");
        assert_eq!(RepoPath::new("a/..").as_str(), ".");
        assert_eq!(RepoPath::new("../shared").as_str(), "../shared");
        assert!(RepoPath::new("a/../../b").escapes_root());
        assert_eq!(RepoPath::new("/../etc").as_str(), "/etc");
    }

    #[test]
    fn join_and_parent() {
        let dir = RepoPath::new("code/example");
        assert_eq!(dir.join("../modules/bucket").as_str(), "code/modules/bucket");
        assert_eq!(dir.join("main.tf").parent(), dir);
        assert_eq!(RepoPath::new("main.tf").parent(), RepoPath::root());
        assert_eq!(RepoPath::root().join("main.tf").as_str(), "main.tf");
        assert_eq!(RepoPath::new("a/b/main.tf").file_name(), "main.tf");
    }

    #[test]
    fn prefix_checks_respect_segments() {
        let dir = RepoPath::new("modules");
        assert!(RepoPath::new("modules/x/main.tf").starts_with(&dir));
        assert!(!RepoPath::new("modules-extra/main.tf").starts_with(&dir));
        assert_eq!(
            RepoPath::new("modules/x/main.tf").strip_prefix(&dir),
            Some(RepoPath::new("x/main.tf"))
        );
        assert!(RepoPath::new("x").starts_with(&RepoPath::root()));
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(input in "[a-z./]{0,24}") {
            let once = RepoPath::new(&input);
            let twice = RepoPath::new(once.as_str());
            prop_assert_eq!(once, twice);
        }
    }
}
