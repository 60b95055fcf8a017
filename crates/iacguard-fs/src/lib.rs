//! Read-only filesystem abstraction.
//!
//! Every stage of a scan reads through [`FileSystem`]: the scan root, remote modules unpacked
//! into the download cache, and user policy directories. Paths are always [`RepoPath`]s
//! relative to the root of the filesystem they belong to.

#![forbid(unsafe_code)]

mod mem;
mod os;

use iacguard_types::{CancellationToken, Cancelled, RepoPath};
use std::fmt;
use std::io;
use tracing::warn;

pub use mem::MemFs;
pub use os::OsFs;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub path: RepoPath,
    pub is_dir: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("read directory {path}: {source}")]
    Io {
        path: RepoPath,
        #[source]
        source: io::Error,
    },
}

pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Human-readable identity of the filesystem root, unique per instance.
    fn location(&self) -> String;

    fn read_to_string(&self, path: &RepoPath) -> io::Result<String>;

    /// Immediate children of `path`, sorted by path.
    fn read_dir(&self, path: &RepoPath) -> io::Result<Vec<DirEntry>>;

    fn is_dir(&self, path: &RepoPath) -> bool;

    fn is_file(&self, path: &RepoPath) -> bool;

    fn exists(&self, path: &RepoPath) -> bool {
        self.is_dir(path) || self.is_file(path)
    }

    /// All files below `root`, sorted. Cancellation is checked between entries;
    /// unreadable subdirectories are logged and skipped.
    fn walk(&self, root: &RepoPath, cancel: &CancellationToken) -> Result<Vec<RepoPath>, WalkError> {
        let mut files = Vec::new();
        let mut pending = vec![root.clone()];
        let mut first = true;

        while let Some(dir) = pending.pop() {
            cancel.check()?;
            let entries = match self.read_dir(&dir) {
                Ok(entries) => entries,
                Err(source) if first => return Err(WalkError::Io { path: dir, source }),
                Err(e) => {
                    warn!("skipping unreadable directory {}: {}", dir, e);
                    continue;
                }
            };
            first = false;

            for entry in entries {
                cancel.check()?;
                if entry.is_dir {
                    pending.push(entry.path);
                } else {
                    files.push(entry.path);
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_walk_lists_nested_files_in_order() {
        let fs = MemFs::from_files([
            ("b/main.tf", ""),
            ("a/modules/x/main.tf", ""),
            ("a/main.tf", ""),
        ]);
        let files = fs
            .walk(&RepoPath::root(), &CancellationToken::new())
            .expect("walk");
        let paths: Vec<&str> = files.iter().map(|p| p.as_str()).collect();
        assert_eq!(paths, vec!["a/main.tf", "a/modules/x/main.tf", "b/main.tf"]);
    }

    #[test]
    fn walk_stops_when_cancelled() {
        let fs = MemFs::from_files([("main.tf", "")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fs.walk(&RepoPath::root(), &cancel).expect_err("cancelled");
        assert!(matches!(err, WalkError::Cancelled(_)));
    }

    #[test]
    fn walk_of_missing_root_is_an_error() {
        let fs = MemFs::from_files([("main.tf", "")]);
        let err = fs
            .walk(&RepoPath::new("missing"), &CancellationToken::new())
            .expect_err("missing root");
        assert!(matches!(err, WalkError::Io { .. }));
    }
}
