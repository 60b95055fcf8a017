use iacguard_types::{Cancelled, RepoPath};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("read module directory {path}")]
    ReadModule {
        path: RepoPath,
        #[source]
        source: io::Error,
    },

    #[error("build evaluation worker pool: {0}")]
    WorkerPool(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}
