use crate::error::ResolveError;
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Content-addressed download cache shared by concurrent resolutions.
///
/// Each entry is a directory named after [`ModuleCache::key`]. Fetches are staged in a
/// temporary directory inside the cache root and renamed into place; when two resolutions
/// race for the same key the first rename wins and the loser's staging directory is dropped.
#[derive(Clone, Debug)]
pub struct ModuleCache {
    root: Utf8PathBuf,
}

impl ModuleCache {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Stable key for a `(source, version)` pair.
    pub fn key(source: &str, version: Option<&str>) -> String {
        let canonical = format!("{source}@{}", version.unwrap_or_default());
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn entry(&self, key: &str) -> Utf8PathBuf {
        self.root.join(key)
    }

    /// Returns the cached directory for `key`, running `fetch` into a staging directory when
    /// the entry is missing (or `refresh` is set).
    pub fn get_or_fetch<F>(&self, key: &str, refresh: bool, fetch: F) -> Result<Utf8PathBuf, ResolveError>
    where
        F: FnOnce(&Utf8Path) -> Result<(), ResolveError>,
    {
        let target = self.entry(key);
        if target.is_dir() && !refresh {
            debug!("module cache hit {}", target);
            return Ok(target);
        }

        std::fs::create_dir_all(&self.root).map_err(|e| ResolveError::io(self.root.as_str(), e))?;
        let stage = tempfile::Builder::new()
            .prefix(".stage-")
            .tempdir_in(&self.root)
            .map_err(|e| ResolveError::io(self.root.as_str(), e))?;
        let stage_path = Utf8PathBuf::from_path_buf(stage.path().to_path_buf()).map_err(|p| {
            ResolveError::io(
                p.display().to_string(),
                std::io::Error::new(std::io::ErrorKind::InvalidData, "non UTF-8 cache path"),
            )
        })?;

        fetch(&stage_path)?;

        if refresh && target.is_dir() {
            std::fs::remove_dir_all(&target).map_err(|e| ResolveError::io(target.as_str(), e))?;
        }
        match std::fs::rename(&stage_path, &target) {
            Ok(()) => debug!("cached module {}", target),
            Err(_) if target.is_dir() => debug!("module cache {} filled concurrently", target),
            Err(e) => return Err(ResolveError::io(target.as_str(), e)),
        }

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn utf8_root(tmp: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 path")
    }

    #[test]
    fn keys_depend_on_source_and_version() {
        let a = ModuleCache::key("acme/net/aws", Some("1.0.0"));
        let b = ModuleCache::key("acme/net/aws", Some("1.1.0"));
        assert_ne!(a, b);
        assert_eq!(a, ModuleCache::key("acme/net/aws", Some("1.0.0")));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn second_lookup_is_served_from_cache() {
        let tmp = tempfile::TempDir::new().expect("temp dir");
        let cache = ModuleCache::new(utf8_root(&tmp));
        let fetches = AtomicUsize::new(0);
        let fetch = |dest: &Utf8Path| {
            fetches.fetch_add(1, Ordering::SeqCst);
            std::fs::write(dest.join("main.tf"), "").map_err(|e| ResolveError::io(dest.as_str(), e))
        };

        let first = cache.get_or_fetch("k", false, fetch).expect("first");
        let second = cache.get_or_fetch("k", false, fetch).expect("second");
        assert_eq!(first, second);
        assert!(first.join("main.tf").is_file());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_fetch_leaves_no_entry() {
        let tmp = tempfile::TempDir::new().expect("temp dir");
        let cache = ModuleCache::new(utf8_root(&tmp));
        let err = cache
            .get_or_fetch("k", false, |_| {
                Err(ResolveError::UnsupportedSource {
                    source_str: "x".to_string(),
                })
            })
            .expect_err("fetch fails");
        assert!(matches!(err, ResolveError::UnsupportedSource { .. }));
        assert!(!cache.entry("k").exists());

        let leftovers = std::fs::read_dir(cache.root()).expect("read").count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn concurrent_fill_keeps_first_writer() {
        let tmp = tempfile::TempDir::new().expect("temp dir");
        let cache = ModuleCache::new(utf8_root(&tmp));

        let winner = cache.entry("k");
        let result = cache
            .get_or_fetch("k", false, |dest| {
                // Another resolver finishes while this one is still fetching.
                std::fs::create_dir_all(&winner).expect("winner dir");
                std::fs::write(winner.join("winner.tf"), "").expect("winner file");
                std::fs::write(dest.join("loser.tf"), "").map_err(|e| ResolveError::io(dest.as_str(), e))
            })
            .expect("resolve");

        assert!(result.join("winner.tf").is_file());
        assert!(!result.join("loser.tf").exists());
    }
}
