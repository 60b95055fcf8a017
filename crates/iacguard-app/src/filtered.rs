use iacguard_fs::{DirEntry, FileSystem};
use iacguard_settings::ScanFilter;
use iacguard_types::RepoPath;
use std::io;
use std::sync::Arc;

/// View of a filesystem with skipped files and directories hidden.
///
/// Globs match paths relative to the scan root, so `modules/**` means the same thing
/// whether the scan starts at the filesystem root or below it.
#[derive(Debug)]
pub(crate) struct FilteredFs {
    inner: Arc<dyn FileSystem>,
    root: RepoPath,
    filter: ScanFilter,
}

impl FilteredFs {
    pub(crate) fn new(inner: Arc<dyn FileSystem>, root: RepoPath, filter: ScanFilter) -> Self {
        Self { inner, root, filter }
    }

    fn relative(&self, path: &RepoPath) -> RepoPath {
        path.strip_prefix(&self.root).unwrap_or_else(|| path.clone())
    }

    fn hides_dir(&self, path: &RepoPath) -> bool {
        let rel = self.relative(path);
        !rel.is_root() && (self.filter.skips_dir(&rel) || self.filter.skips_file(&rel))
    }

    fn hides_file(&self, path: &RepoPath) -> bool {
        self.filter.skips_file(&self.relative(path))
    }
}

impl FileSystem for FilteredFs {
    fn location(&self) -> String {
        self.inner.location()
    }

    fn read_to_string(&self, path: &RepoPath) -> io::Result<String> {
        if self.hides_file(path) {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("{path} is skipped")));
        }
        self.inner.read_to_string(path)
    }

    fn read_dir(&self, path: &RepoPath) -> io::Result<Vec<DirEntry>> {
        if self.hides_dir(path) {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("{path} is skipped")));
        }
        let entries = self.inner.read_dir(path)?;
        Ok(entries
            .into_iter()
            .filter(|e| {
                if e.is_dir {
                    !self.hides_dir(&e.path)
                } else {
                    !self.hides_file(&e.path)
                }
            })
            .collect())
    }

    fn is_dir(&self, path: &RepoPath) -> bool {
        !self.hides_dir(path) && self.inner.is_dir(path)
    }

    fn is_file(&self, path: &RepoPath) -> bool {
        !self.hides_file(path) && self.inner.is_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iacguard_fs::MemFs;
    use iacguard_types::CancellationToken;

    fn filtered(root: &str, skip_dirs: &[&str], skip_files: &[&str]) -> FilteredFs {
        let fs = MemFs::from_files([
            ("infra/main.tf", ""),
            ("infra/modules/vpc/main.tf", ""),
            ("infra/test/fixture.tf", ""),
            ("infra/README.md", ""),
        ]);
        let strings = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let filter = ScanFilter::new(&strings(skip_dirs), &strings(skip_files)).expect("filter");
        FilteredFs::new(Arc::new(fs), RepoPath::new(root), filter)
    }

    #[test]
    fn walk_skips_directories_and_files() {
        let fs = filtered("infra", &["modules/**", "test"], &["*.md"]);
        let files = fs
            .walk(&RepoPath::new("infra"), &CancellationToken::new())
            .expect("walk");
        assert_eq!(files, vec![RepoPath::new("infra/main.tf")]);
    }

    #[test]
    fn skipped_files_are_unreadable() {
        let fs = filtered("infra", &[], &["**/fixture.tf"]);
        assert!(!fs.is_file(&RepoPath::new("infra/test/fixture.tf")));
        assert!(fs.read_to_string(&RepoPath::new("infra/test/fixture.tf")).is_err());
        assert!(fs.is_file(&RepoPath::new("infra/main.tf")));
    }

    #[test]
    fn scan_root_is_never_hidden() {
        let fs = filtered("infra", &["**"], &[]);
        assert!(fs.is_dir(&RepoPath::new("infra")));
        assert!(!fs.is_dir(&RepoPath::new("infra/modules")));
    }
}
