use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use iacguard_types::RepoPath;

/// Skip-dir and skip-file globs applied while walking the scan root.
#[derive(Clone, Debug)]
pub struct ScanFilter {
    dirs: GlobSet,
    files: GlobSet,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            dirs: GlobSet::empty(),
            files: GlobSet::empty(),
        }
    }
}

impl ScanFilter {
    pub fn new(skip_dirs: &[String], skip_files: &[String]) -> anyhow::Result<Self> {
        Ok(Self {
            dirs: build("skip_dirs", skip_dirs)?,
            files: build("skip_files", skip_files)?,
        })
    }

    pub fn skips_dir(&self, dir: &RepoPath) -> bool {
        !dir.is_root() && self.dirs.is_match(dir.as_str())
    }

    /// A file is skipped by a file glob, or when it or any directory above it matches a dir glob.
    pub fn skips_file(&self, file: &RepoPath) -> bool {
        if self.files.is_match(file.as_str()) || self.dirs.is_match(file.as_str()) {
            return true;
        }
        let mut dir = file.parent();
        while !dir.is_root() {
            if self.dirs.is_match(dir.as_str()) {
                return true;
            }
            dir = dir.parent();
        }
        false
    }
}

fn build(field: &str, patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).with_context(|| format!("invalid {field} glob: {pattern}"))?;
        builder.add(glob);
    }
    builder
        .build()
        .with_context(|| format!("build {field} globs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(dirs: &[&str], files: &[&str]) -> ScanFilter {
        let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        ScanFilter::new(&owned(dirs), &owned(files)).expect("filter")
    }

    #[test]
    fn dir_globs_skip_everything_below() {
        let f = filter(&["**/.terraform", "**/vendor/**"], &[]);
        assert!(f.skips_dir(&RepoPath::new("envs/prod/.terraform")));
        assert!(f.skips_file(&RepoPath::new("envs/prod/.terraform/modules/vpc/main.tf")));
        assert!(f.skips_file(&RepoPath::new("vendor/mod/main.tf")));
        assert!(!f.skips_file(&RepoPath::new("envs/prod/main.tf")));
    }

    #[test]
    fn file_globs_match_paths() {
        let f = filter(&[], &["**/*_override.tf"]);
        assert!(f.skips_file(&RepoPath::new("a/b/x_override.tf")));
        assert!(!f.skips_file(&RepoPath::new("a/b/main.tf")));
        assert!(!f.skips_dir(&RepoPath::new("a")));
    }

    #[test]
    fn invalid_globs_are_rejected() {
        let err = ScanFilter::new(&["a/[".to_string()], &[]).expect_err("invalid");
        assert!(err.to_string().contains("skip_dirs"));
    }
}
