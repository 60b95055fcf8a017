//! Module resolution.
//!
//! Given a `module` block's `source` (and optional `version`), produce a [`ModuleDefinition`]
//! pointing at a directory of parseable configuration. The pre-fetched cache manifest is
//! consulted first; otherwise the source is classified (local path, registry coordinate,
//! git, HTTP archive, cloud storage) and remote modules are fetched into a content-addressed
//! download cache.
//!
//! This crate does network IO and may spawn `git`; everything else in the engine stays offline.

#![forbid(unsafe_code)]

mod cache;
mod error;
mod fetch;
mod manifest;
mod registry;
mod resolver;
mod source;
mod version;

pub use cache::ModuleCache;
pub use error::ResolveError;
pub use manifest::{MANIFEST_PATH, Manifest, ManifestEntry};
pub use resolver::{
    DefaultResolver, ModuleDefinition, ModuleRequest, ModuleResolver, ResolverOptions,
    default_cache_dir,
};
pub use source::{
    DEFAULT_REGISTRY_HOST, ModuleSource, source_from_value, split_subdir, storage_endpoint,
};
pub use version::{VersionConstraint, select_version};
