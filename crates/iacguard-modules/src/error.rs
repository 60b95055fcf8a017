use iacguard_types::{Cancelled, SourceRange};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("could not read module source attribute at {range}")]
    MissingSource { range: SourceRange },

    #[error("empty module source at {range}")]
    EmptySource { range: SourceRange },

    #[error("module source {source_str} is not a directory")]
    NotFound { source_str: String },

    #[error("remote module {source_str} requires downloads, which are disabled")]
    DownloadsDisabled { source_str: String },

    #[error("unsupported module source: {source_str}")]
    UnsupportedSource { source_str: String },

    #[error("invalid version constraint {constraint:?}: {message}")]
    InvalidConstraint { constraint: String, message: String },

    #[error("no version of {source_str} satisfies {constraint:?}")]
    NoMatchingVersion {
        source_str: String,
        constraint: String,
    },

    #[error("registry response from {url}: {message}")]
    Registry { url: String, message: String },

    #[error("request {url}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request {url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("git {action} for {url}: {message}")]
    Git {
        url: String,
        action: &'static str,
        message: String,
    },

    #[error("extract archive from {url}: {message}")]
    Archive { url: String, message: String },

    #[error("module cache {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("module cycle: {chain}")]
    Cycle { chain: String },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl ResolveError {
    pub(crate) fn io(path: impl Into<String>, source: io::Error) -> Self {
        ResolveError::Io {
            path: path.into(),
            source,
        }
    }
}
