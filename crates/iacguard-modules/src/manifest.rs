use crate::source::split_subdir;
use iacguard_fs::FileSystem;
use iacguard_types::RepoPath;
use serde::Deserialize;
use tracing::{debug, warn};

/// Location of the manifest written by a prior `init`, relative to the project root.
pub const MANIFEST_PATH: &str = ".terraform/modules/modules.json";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    #[serde(rename = "Modules", default)]
    pub modules: Vec<ManifestEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ManifestEntry {
    /// Dotted chain of module names from the root, e.g. `network.subnets`.
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Source", default)]
    pub source: String,
    #[serde(rename = "Version", default)]
    pub version: Option<String>,
    /// Directory relative to the project root.
    #[serde(rename = "Dir")]
    pub dir: String,
}

impl Manifest {
    /// Loads the manifest under `project_root`. A missing manifest is `None`;
    /// an unreadable one is logged and treated as missing.
    pub fn load(fs: &dyn FileSystem, project_root: &RepoPath) -> Option<Manifest> {
        let path = project_root.join(MANIFEST_PATH);
        if !fs.is_file(&path) {
            return None;
        }

        let text = match fs.read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to read module manifest {}: {}", path, e);
                return None;
            }
        };
        match serde_json::from_str::<Manifest>(&text) {
            Ok(manifest) => {
                debug!("loaded module manifest {} ({} entries)", path, manifest.modules.len());
                Some(manifest)
            }
            Err(e) => {
                warn!("failed to parse module manifest {}: {}", path, e);
                None
            }
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&ManifestEntry> {
        if key.is_empty() {
            return None;
        }
        self.modules.iter().find(|m| m.key == key)
    }
}

impl ManifestEntry {
    /// Directory of the cached module, with the source's `//subdir` appended when the
    /// recorded `Dir` does not already end with it.
    pub fn module_dir(&self, project_root: &RepoPath) -> RepoPath {
        let dir = project_root.join(&self.dir);
        let (_, subdir) = split_subdir(self.source.split('?').next().unwrap_or_default());
        match subdir {
            Some(sub) if !dir.as_str().ends_with(sub.trim_end_matches('/')) => dir.join(&sub),
            _ => dir,
        }
    }
}
