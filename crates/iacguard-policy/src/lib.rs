//! Policy engine: loads declarative rule sets and native checks, gates them by input
//! selector and namespace, evaluates them against evaluated documents and resolves the
//! outcomes into findings.
//!
//! Rule files are TOML. Each file declares a `package` (its namespace), optional
//! `[metadata]`, `[[input.selector]]` entries, `[[rule]]`s whose names start with
//! `deny`, `warn` or `allow`, `[[exception]]`s and reusable `[[define]]` predicates.
//!
//! Resolution order per (policy, input): raw pass/fail, then namespace exceptions from
//! the `namespace.exceptions` package, then rule exceptions declared in the policy's own
//! namespace. Exceptions only ever move a result to ignored.

#![forbid(unsafe_code)]

mod condition;
mod document;
mod engine;
mod error;
mod evaluator;
mod input;
mod loader;
pub mod native;
mod path;
mod policy;
mod results;
mod selector;
mod template;
mod trace;

pub use condition::{Library, MAX_CALL_DEPTH};
pub use document::RuleFile;
pub use engine::{Engine, EngineOptions, EngineOutput};
pub use error::{CompileError, LoadError, PolicyError, RuleError};
pub use evaluator::{EvalEnv, PolicyEvaluator, PolicyInfo, PolicySource, RawOutcome, RuleKind};
pub use input::{Input, Subtype};
pub use loader::{PolicySet, PolicySources, SourceDir, load_policies};
pub use policy::{Exception, ExceptionKind, Policy};
pub use results::fingerprint;
pub use selector::Selector;
pub use trace::{LogSink, MemorySink, TraceMode, TraceSink, Tracer};

/// Stable entry points for fuzzing.
pub mod fuzz {
    /// Parses and compiles a rule file. Must never panic.
    pub fn compile_rule_file(text: &str) {
        if let Ok(file) = crate::document::RuleFile::parse(text) {
            let known = crate::policy::define_names(&file).collect();
            let _ = crate::policy::compile_file(
                &file,
                crate::evaluator::PolicySource::Embedded("fuzz.toml".to_string()),
                &known,
            );
        }
    }

    /// Parses a rule path and a message template. Must never panic.
    pub fn parse_path_and_template(text: &str) {
        let _ = crate::path::Path::parse(text);
        let _ = crate::template::Template::parse(text);
    }
}
