use crate::{DirEntry, FileSystem};
use iacguard_types::RepoPath;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// In-memory filesystem. Directories exist implicitly when a file lives beneath them.
#[derive(Debug)]
pub struct MemFs {
    id: u64,
    files: BTreeMap<RepoPath, String>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            files: BTreeMap::new(),
        }
    }

    pub fn from_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let mut fs = Self::new();
        for (path, contents) in files {
            fs.insert(path, contents);
        }
        fs
    }

    pub fn insert<P: AsRef<str>, C: Into<String>>(&mut self, path: P, contents: C) {
        self.files.insert(RepoPath::new(path), contents.into());
    }

    pub fn with_file<P: AsRef<str>, C: Into<String>>(mut self, path: P, contents: C) -> Self {
        self.insert(path, contents);
        self
    }
}

impl FileSystem for MemFs {
    fn location(&self) -> String {
        format!("memory:{}", self.id)
    }

    fn read_to_string(&self, path: &RepoPath) -> io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{path} not found")))
    }

    fn read_dir(&self, path: &RepoPath) -> io::Result<Vec<DirEntry>> {
        if !self.is_dir(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{path} is not a directory"),
            ));
        }

        let mut children: BTreeMap<RepoPath, bool> = BTreeMap::new();
        for file in self.files.keys() {
            let Some(rel) = file.strip_prefix(path) else { continue };
            if rel.is_root() {
                continue;
            }
            match rel.as_str().split_once('/') {
                Some((first, _)) => {
                    children.insert(path.join(first), true);
                }
                None => {
                    children.entry(file.clone()).or_insert(false);
                }
            }
        }

        Ok(children
            .into_iter()
            .map(|(path, is_dir)| DirEntry { path, is_dir })
            .collect())
    }

    fn is_dir(&self, path: &RepoPath) -> bool {
        if path.is_root() {
            return true;
        }
        if path.escapes_root() {
            return false;
        }
        self.files
            .keys()
            .any(|file| file != path && file.starts_with(path))
    }

    fn is_file(&self, path: &RepoPath) -> bool {
        self.files.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_are_implicit() {
        let fs = MemFs::from_files([("code/example/main.tf", "x"), ("code/readme.md", "y")]);
        assert!(fs.is_dir(&RepoPath::root()));
        assert!(fs.is_dir(&RepoPath::new("code")));
        assert!(fs.is_dir(&RepoPath::new("code/example")));
        assert!(!fs.is_dir(&RepoPath::new("code/readme.md")));
        assert!(fs.is_file(&RepoPath::new("code/readme.md")));
        assert!(!fs.is_dir(&RepoPath::new("cod")));
    }

    #[test]
    fn read_dir_lists_immediate_children() {
        let fs = MemFs::from_files([
            ("code/example/main.tf", ""),
            ("code/modules/x/main.tf", ""),
            ("code/main.tf", ""),
        ]);
        let entries = fs.read_dir(&RepoPath::new("code")).expect("read dir");
        let listed: Vec<(&str, bool)> = entries
            .iter()
            .map(|e| (e.path.as_str(), e.is_dir))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("code/example", true),
                ("code/main.tf", false),
                ("code/modules", true)
            ]
        );
    }

    #[test]
    fn each_instance_has_its_own_location() {
        assert_ne!(MemFs::new().location(), MemFs::new().location());
    }
}
