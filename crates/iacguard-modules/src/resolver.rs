use crate::cache::ModuleCache;
use crate::error::ResolveError;
use crate::fetch::{fetch_archive, fetch_git};
use crate::manifest::Manifest;
use crate::registry::RegistryClient;
use crate::source::{ModuleSource, storage_endpoint};
use crate::version::{VersionConstraint, select_version};
use camino::{Utf8Path, Utf8PathBuf};
use iacguard_fs::{FileSystem, OsFs};
use iacguard_types::{CancellationToken, RepoPath, SourceRange};
use reqwest::blocking::Client;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

/// Marker written next to registry packages whose download location names a subdirectory.
const SUBDIR_MARKER: &str = ".iacguard-subdir";

/// Resolution metadata for one `module` block.
#[derive(Clone)]
pub struct ModuleDefinition {
    pub name: String,
    pub source: String,
    /// Resolved version (registry) or git reference, when there is one.
    pub version: Option<String>,
    pub fs: Arc<dyn FileSystem>,
    pub path: RepoPath,
    /// Fetched from outside the scanned tree.
    pub external: bool,
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("version", &self.version)
            .field("fs", &self.fs.location())
            .field("path", &self.path)
            .field("external", &self.external)
            .finish()
    }
}

/// Everything a resolver needs to know about one `module` block.
#[derive(Clone, Copy)]
pub struct ModuleRequest<'a> {
    pub name: &'a str,
    /// Dotted chain of module names from the root module, e.g. `network.subnets`.
    pub key: &'a str,
    pub source: &'a str,
    pub version: Option<&'a str>,
    pub range: &'a SourceRange,
    /// Filesystem and directory of the calling module.
    pub caller_fs: &'a Arc<dyn FileSystem>,
    pub caller_dir: &'a RepoPath,
    /// Filesystem and directory of the root module (holder of the cache manifest).
    pub root_fs: &'a Arc<dyn FileSystem>,
    pub project_root: &'a RepoPath,
}

pub trait ModuleResolver: Send + Sync + fmt::Debug {
    fn resolve(
        &self,
        request: &ModuleRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ModuleDefinition, ResolveError>;
}

#[derive(Clone, Debug)]
pub struct ResolverOptions {
    pub cache_dir: Utf8PathBuf,
    pub allow_downloads: bool,
    /// Ignore existing cache entries and fetch again.
    pub skip_cache: bool,
    pub timeout: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            allow_downloads: true,
            skip_cache: false,
            timeout: Duration::from_secs(30),
        }
    }
}

pub fn default_cache_dir() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from(".iacguard"))
        .join("iacguard")
        .join("modules")
}

/// Cache manifest first, then local paths, then remote sources through the download cache.
pub struct DefaultResolver {
    options: ResolverOptions,
    cache: ModuleCache,
    manifests: Mutex<BTreeMap<(String, RepoPath), Option<Arc<Manifest>>>>,
    client: OnceLock<Result<Client, String>>,
}

impl fmt::Debug for DefaultResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultResolver")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DefaultResolver {
    pub fn new(options: ResolverOptions) -> Self {
        let cache = ModuleCache::new(options.cache_dir.clone());
        Self {
            options,
            cache,
            manifests: Mutex::new(BTreeMap::new()),
            client: OnceLock::new(),
        }
    }

    fn manifest(&self, fs: &Arc<dyn FileSystem>, project_root: &RepoPath) -> Option<Arc<Manifest>> {
        let key = (fs.location(), project_root.clone());
        let mut manifests = self.manifests.lock().unwrap_or_else(|e| e.into_inner());
        manifests
            .entry(key)
            .or_insert_with(|| Manifest::load(fs.as_ref(), project_root).map(Arc::new))
            .clone()
    }

    fn from_manifest(&self, request: &ModuleRequest<'_>) -> Option<ModuleDefinition> {
        let manifest = self.manifest(request.root_fs, request.project_root)?;
        let entry = manifest.lookup(request.key)?;
        let dir = entry.module_dir(request.project_root);
        if !request.root_fs.is_dir(&dir) {
            debug!(
                "module manifest entry {} points at missing {}; resolving directly",
                entry.key, dir
            );
            return None;
        }

        debug!("module {} resolved from cache manifest at {}", request.key, dir);
        let external = !ModuleSource::parse(&entry.source)
            .map(|s| s.is_local())
            .unwrap_or(true);
        Some(ModuleDefinition {
            name: request.name.to_string(),
            source: request.source.to_string(),
            version: entry.version.clone(),
            fs: Arc::clone(request.root_fs),
            path: dir,
            external,
        })
    }

    fn client(&self) -> Result<&Client, ResolveError> {
        let timeout = self.options.timeout;
        self.client
            .get_or_init(|| {
                Client::builder()
                    .timeout(timeout)
                    .user_agent(concat!("iacguard/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|message| ResolveError::Registry {
                url: String::new(),
                message: message.clone(),
            })
    }

    fn resolve_remote(
        &self,
        request: &ModuleRequest<'_>,
        source: ModuleSource,
        cancel: &CancellationToken,
    ) -> Result<ModuleDefinition, ResolveError> {
        if !self.options.allow_downloads {
            return Err(ResolveError::DownloadsDisabled {
                source_str: request.source.to_string(),
            });
        }
        cancel.check()?;

        let (dir, version, subdir) = match &source {
            ModuleSource::Registry {
                host,
                namespace,
                name,
                system,
                subdir,
            } => {
                let client = self.client()?;
                let registry = RegistryClient::discover(client, host)?;
                let constraint_text = request.version.unwrap_or_default();
                let constraint = VersionConstraint::parse(constraint_text)?;
                let available = registry.versions(namespace, name, system)?;
                let version = select_version(&available, &constraint).ok_or_else(|| {
                    ResolveError::NoMatchingVersion {
                        source_str: request.source.to_string(),
                        constraint: constraint_text.to_string(),
                    }
                })?;
                let version = version.to_string();
                cancel.check()?;

                let key = ModuleCache::key(request.source, Some(&version));
                let dir = self.cache.get_or_fetch(&key, self.options.skip_cache, |dest| {
                    let location = registry.download_source(namespace, name, system, &version)?;
                    let inner = ModuleSource::parse(&location)?;
                    self.fetch_into(&inner, dest, cancel)?;
                    if let Some(inner_subdir) = inner.subdir() {
                        std::fs::write(dest.join(SUBDIR_MARKER), inner_subdir)
                            .map_err(|e| ResolveError::io(dest.as_str(), e))?;
                    }
                    Ok(())
                })?;

                let mut combined = read_subdir_marker(&dir);
                if let Some(sub) = subdir {
                    combined = Some(match combined {
                        Some(inner) => format!("{inner}/{sub}"),
                        None => sub.clone(),
                    });
                }
                (dir, Some(version), combined)
            }
            ModuleSource::Git {
                reference, subdir, ..
            } => {
                let key = ModuleCache::key(request.source, reference.as_deref());
                let dir = self.cache.get_or_fetch(&key, self.options.skip_cache, |dest| {
                    self.fetch_into(&source, dest, cancel)
                })?;
                (dir, reference.clone(), subdir.clone())
            }
            ModuleSource::Http { subdir, .. } | ModuleSource::Storage { subdir, .. } => {
                let key = ModuleCache::key(request.source, None);
                let dir = self.cache.get_or_fetch(&key, self.options.skip_cache, |dest| {
                    self.fetch_into(&source, dest, cancel)
                })?;
                (dir, None, subdir.clone())
            }
            ModuleSource::Local { .. } => {
                return Err(ResolveError::UnsupportedSource {
                    source_str: request.source.to_string(),
                });
            }
        };

        let fs: Arc<dyn FileSystem> = Arc::new(OsFs::new(dir));
        let path = RepoPath::new(subdir.as_deref().unwrap_or("."));
        if !fs.is_dir(&path) {
            return Err(ResolveError::NotFound {
                source_str: request.source.to_string(),
            });
        }

        info!("resolved remote module {} ({})", request.key, request.source);
        Ok(ModuleDefinition {
            name: request.name.to_string(),
            source: request.source.to_string(),
            version,
            fs,
            path,
            external: true,
        })
    }

    fn fetch_into(
        &self,
        source: &ModuleSource,
        dest: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<(), ResolveError> {
        match source {
            ModuleSource::Git { url, reference, .. } => fetch_git(url, reference.as_deref(), dest, cancel),
            ModuleSource::Http { url, .. } => fetch_archive(self.client()?, url, dest, cancel),
            ModuleSource::Storage { url, .. } => {
                fetch_archive(self.client()?, &storage_endpoint(url), dest, cancel)
            }
            _ => Err(ResolveError::UnsupportedSource {
                source_str: format!("{source:?}"),
            }),
        }
    }
}

fn read_subdir_marker(dir: &Utf8Path) -> Option<String> {
    std::fs::read_to_string(dir.join(SUBDIR_MARKER))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl ModuleResolver for DefaultResolver {
    fn resolve(
        &self,
        request: &ModuleRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ModuleDefinition, ResolveError> {
        if request.source.trim().is_empty() {
            return Err(ResolveError::EmptySource {
                range: request.range.clone(),
            });
        }
        if let Some(definition) = self.from_manifest(request) {
            return Ok(definition);
        }

        match ModuleSource::parse(request.source)? {
            ModuleSource::Local { path } => {
                let dir = request.caller_dir.join(&path);
                if !request.caller_fs.is_dir(&dir) {
                    return Err(ResolveError::NotFound {
                        source_str: request.source.to_string(),
                    });
                }
                Ok(ModuleDefinition {
                    name: request.name.to_string(),
                    source: request.source.to_string(),
                    version: None,
                    fs: Arc::clone(request.caller_fs),
                    path: dir,
                    external: false,
                })
            }
            remote => self.resolve_remote(request, remote, cancel),
        }
    }
}
