//! Evaluator: configuration directories to value-resolved module trees.
//!
//! A module instance is evaluated by repeated passes over its blocks. Each pass expands
//! `count`/`for_each`/`dynamic` blocks, evaluates every attribute against the context
//! produced by the previous pass, evaluates called modules with the resulting inputs, and
//! exposes their outputs as `module.<name>`. The loop stops once a pass leaves the context
//! unchanged or after [`EvalOptions::max_passes`], in which case the last values are kept
//! and the module is marked as not converged.
//!
//! Nothing here fails on unresolvable values: they evaluate to [`Value::Unknown`].

#![forbid(unsafe_code)]

mod error;
mod evaluator;
mod expand;
pub mod functions;
mod loader;
mod model;
mod scope;

pub use error::EvalError;
pub use evaluator::{EvalOptions, Evaluator};
pub use iacguard_hcl::Value;
pub use loader::{LoadedModule, is_config_file, load_module, load_var_file};
pub use model::{EvaluatedAttribute, EvaluatedBlock, EvaluatedModule, InstanceKey, SkippedModule};
pub use scope::Scope;
