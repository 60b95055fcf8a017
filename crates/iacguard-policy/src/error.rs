use iacguard_types::Cancelled;

/// Fatal problems while loading policy sources.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("read policy source {path}: {message}")]
    Read { path: String, message: String },

    #[error("policy {path} declares schema {schema:?}: {message}")]
    Schema {
        path: String,
        schema: String,
        message: String,
    },

    #[error("data file {path}: {message}")]
    Data { path: String, message: String },
}

/// A rule that cannot be compiled. The rule is skipped; the run continues.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{path}: {message}")]
pub struct CompileError {
    pub path: String,
    pub message: String,
}

/// Failure while evaluating one policy against one input.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("{policy}: rule {rule}: {message}")]
    Type {
        policy: String,
        rule: String,
        message: String,
    },

    #[error("{policy}: predicate {name} recursed deeper than {limit}")]
    Recursion {
        policy: String,
        name: String,
        limit: usize,
    },

    #[error("{policy}: {message}")]
    Native { policy: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("policy evaluation aborted after {count} errors (limit {limit}); last: {last}")]
    ErrorLimitExceeded {
        count: usize,
        limit: usize,
        last: RuleError,
    },

    #[error("build policy worker pool: {0}")]
    WorkerPool(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}
