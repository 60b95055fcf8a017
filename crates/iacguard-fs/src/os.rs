use crate::{DirEntry, FileSystem, WalkError};
use camino::{Utf8Path, Utf8PathBuf};
use iacguard_types::{CancellationToken, RepoPath};
use std::io;
use std::path::PathBuf;
use tracing::warn;
use walkdir::WalkDir;

/// Filesystem rooted at a directory on disk. Paths escaping the root are rejected.
#[derive(Clone, Debug)]
pub struct OsFs {
    root: Utf8PathBuf,
}

impl OsFs {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn resolve(&self, path: &RepoPath) -> io::Result<Utf8PathBuf> {
        if path.escapes_root() || path.as_str().starts_with('/') {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{path} escapes {}", self.root),
            ));
        }
        if path.is_root() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(path.as_str()))
    }

    fn relative(&self, abs: PathBuf) -> Option<RepoPath> {
        let abs = Utf8PathBuf::from_path_buf(abs).ok()?;
        let rel = abs.strip_prefix(&self.root).ok()?;
        Some(RepoPath::from(rel))
    }
}

impl FileSystem for OsFs {
    fn location(&self) -> String {
        self.root.to_string()
    }

    fn read_to_string(&self, path: &RepoPath) -> io::Result<String> {
        std::fs::read_to_string(self.resolve(path)?)
    }

    fn read_dir(&self, path: &RepoPath) -> io::Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(self.resolve(path)?)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("skipping non UTF-8 entry in {}", path);
                continue;
            };
            out.push(DirEntry {
                path: path.join(&name),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        out.sort();
        Ok(out)
    }

    fn is_dir(&self, path: &RepoPath) -> bool {
        self.resolve(path).map(|p| p.is_dir()).unwrap_or(false)
    }

    fn is_file(&self, path: &RepoPath) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn walk(&self, root: &RepoPath, cancel: &CancellationToken) -> Result<Vec<RepoPath>, WalkError> {
        let start = self.resolve(root).map_err(|source| WalkError::Io {
            path: root.clone(),
            source,
        })?;
        if !start.is_dir() {
            return Err(WalkError::Io {
                path: root.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
            });
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&start).sort_by_file_name() {
            cancel.check()?;
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry under {}: {}", start, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(rel) = self.relative(entry.into_path()) {
                files.push(rel);
            }
        }

        files.sort();
        Ok(files)
    }
}
