use crate::error::{CompileError, PolicyError, RuleError};
use crate::evaluator::{EvalEnv, PolicyEvaluator, PolicyInfo};
use crate::input::Input;
use crate::loader::{PolicySet, PolicySources, load_policies};
use crate::results::{Exceptions, finalize, resolve};
use crate::selector::selectors_match;
use crate::trace::{TraceMode, Tracer};
use iacguard_types::ids::{is_builtin_namespace, namespace_matches};
use iacguard_types::{CancellationToken, Finding, Results};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Extra namespaces to run besides the built-in roots. Empty runs everything.
    pub namespaces: Vec<String>,
    pub include_deprecated: bool,
    /// Only declarative rules; native checks are not loaded.
    pub rules_only: bool,
    pub embedded_policies: bool,
    pub embedded_libraries: bool,
    /// Runtime rule errors tolerated before the run is aborted.
    pub error_limit: usize,
    pub trace: TraceMode,
    pub parallelism: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            namespaces: Vec::new(),
            include_deprecated: false,
            rules_only: false,
            embedded_policies: true,
            embedded_libraries: true,
            error_limit: 10,
            trace: TraceMode::Off,
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Result of one engine run. Rule errors below the limit are returned, not raised.
#[derive(Clone, Debug, Default)]
pub struct EngineOutput {
    pub results: Results,
    pub errors: Vec<RuleError>,
}

/// Runs a loaded policy set against inputs.
pub struct Engine {
    set: PolicySet,
    options: EngineOptions,
    pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("policies", &self.set.policies.len())
            .field("content_key", &self.set.content_key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn namespace_allowed(namespace: &str, allowed: &[String]) -> bool {
    allowed.is_empty()
        || is_builtin_namespace(namespace)
        || allowed.iter().any(|prefix| namespace_matches(namespace, prefix))
}

impl Engine {
    pub fn load(
        sources: &PolicySources,
        options: EngineOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, PolicyError> {
        let set = load_policies(sources, &options, cancel)?;
        Self::new(set, options)
    }

    /// Applies the deprecated and namespace filters to `set`.
    pub fn new(mut set: PolicySet, options: EngineOptions) -> Result<Self, PolicyError> {
        set.policies.retain(|policy| {
            let info = policy.info();
            if info.metadata.deprecated && !options.include_deprecated {
                debug!("skipping deprecated policy {}", info.namespace);
                return false;
            }
            if !namespace_allowed(&info.namespace, &options.namespaces) {
                debug!("namespace {} is not enabled", info.namespace);
                return false;
            }
            true
        });

        let pool = if options.parallelism > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(options.parallelism)
                    .thread_name(|i| format!("iacguard-policy-{i}"))
                    .build()
                    .map_err(|e| PolicyError::WorkerPool(e.to_string()))?,
            )
        } else {
            None
        };

        info!(
            "policy engine ready: {} policies (content key {})",
            set.policies.len(),
            set.content_key
        );
        Ok(Self { set, options, pool })
    }

    pub fn policies(&self) -> impl Iterator<Item = &PolicyInfo> {
        self.set.policies.iter().map(|p| p.info())
    }

    pub fn content_key(&self) -> &str {
        &self.set.content_key
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Rule files that failed to parse or compile and were skipped.
    pub fn compile_errors(&self) -> &[CompileError] {
        &self.set.compile_errors
    }

    /// Evaluates every policy whose selector matches each input.
    ///
    /// Pairs are independent and run on the worker pool; the returned results are
    /// deduplicated and sorted, so evaluation order never shows.
    pub fn evaluate(&self, inputs: &[Input], cancel: &CancellationToken) -> Result<EngineOutput, PolicyError> {
        let pairs: Vec<(&Arc<dyn PolicyEvaluator>, &Input)> = inputs
            .iter()
            .flat_map(|input| {
                self.set
                    .policies
                    .iter()
                    .filter(move |policy| {
                        let info = policy.info();
                        selectors_match(&info.selectors, info.schema.as_deref(), input)
                    })
                    .map(move |policy| (policy, input))
            })
            .collect();
        debug!("evaluating {} (policy, input) pairs", pairs.len());

        let run = |pair: &(&Arc<dyn PolicyEvaluator>, &Input)| {
            if let Err(e) = cancel.check() {
                return Err(PolicyError::Cancelled(e));
            }
            Ok(self.evaluate_pair(pair.0.as_ref(), pair.1))
        };
        let outcomes: Vec<Result<Result<Vec<Finding>, RuleError>, PolicyError>> = match &self.pool {
            Some(pool) if pairs.len() > 1 => pool.install(|| pairs.par_iter().map(run).collect()),
            _ => pairs.iter().map(run).collect(),
        };

        let mut findings = Vec::new();
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome? {
                Ok(pair_findings) => findings.extend(pair_findings),
                Err(e) => {
                    warn!("policy evaluation failed: {}", e);
                    errors.push(e);
                    if errors.len() > self.options.error_limit {
                        let count = errors.len();
                        return Err(PolicyError::ErrorLimitExceeded {
                            count,
                            limit: self.options.error_limit,
                            last: errors.swap_remove(count - 1),
                        });
                    }
                }
            }
        }

        Ok(EngineOutput {
            results: finalize(findings),
            errors,
        })
    }

    fn evaluate_pair(&self, policy: &dyn PolicyEvaluator, input: &Input) -> Result<Vec<Finding>, RuleError> {
        let tracer = self.options.trace.enabled().then(Tracer::default);
        let env = EvalEnv {
            data: &self.set.data,
            library: &self.set.library,
            tracer: tracer.as_ref(),
        };
        let exceptions = Exceptions {
            namespace: &self.set.namespace_exceptions,
            rule: &self.set.rule_exceptions,
        };

        let result = policy
            .evaluate(input, &env)
            .and_then(|hits| resolve(policy, input, hits, exceptions, &env));

        let Some(tracer) = tracer else {
            return result;
        };
        let lines = tracer.take();
        match &self.options.trace {
            TraceMode::Global(sink) => {
                sink.record(&lines);
                result
            }
            TraceMode::PerResult => result.map(|mut findings| {
                for finding in &mut findings {
                    finding.traces = lines.clone();
                }
                findings
            }),
            TraceMode::Off => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_keeps_builtin_roots() {
        let allowed = vec!["users".to_string()];
        assert!(namespace_allowed("builtin.aws.s3", &allowed));
        assert!(namespace_allowed("users.naming", &allowed));
        assert!(!namespace_allowed("custom.naming", &allowed));
        assert!(namespace_allowed("custom.naming", &[]));
    }
}
