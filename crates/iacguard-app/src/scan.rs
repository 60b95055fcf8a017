//! The `scan` use case: evaluate every root module and run the policies over it.

use crate::discover::find_root_modules;
use crate::document::cloud_input;
use crate::filtered::FilteredFs;
use crate::highlight::SourceFiles;
use anyhow::Context;
use iacguard_eval::{EvalError, EvaluatedModule, Evaluator, SkippedModule};
use iacguard_fs::{FileSystem, OsFs};
use iacguard_modules::{DefaultResolver, ModuleResolver};
use iacguard_policy::{CompileError, Engine, Input, PolicySources, RuleError, SourceDir};
use iacguard_settings::{IacguardConfigV1, Overrides, ResolvedConfig};
use iacguard_types::{CancellationToken, RepoPath, Results};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};

/// Input for the scan use case.
#[derive(Clone)]
pub struct ScanInput<'a> {
    /// Filesystem holding the scanned tree.
    pub fs: Arc<dyn FileSystem>,
    /// Directory to scan, relative to `fs`.
    pub root: RepoPath,
    /// Config file contents (empty string if not found).
    pub config_text: &'a str,
    pub overrides: Overrides,
    /// Policy and data directories on caller-provided filesystems, loaded after the
    /// configured ones.
    pub extra_sources: PolicySources,
    /// Defaults to a [`DefaultResolver`] built from the resolved module options.
    pub resolver: Option<Arc<dyn ModuleResolver>>,
    pub cancel: &'a CancellationToken,
}

/// Output from the scan use case.
#[derive(Debug)]
pub struct ScanOutput {
    pub results: Results,
    /// Runtime rule errors that stayed below the configured limit.
    pub rule_errors: Vec<RuleError>,
    /// Rule files that were skipped because they failed to compile.
    pub compile_errors: Vec<CompileError>,
    pub roots: Vec<RepoPath>,
    /// Module calls that could not be resolved; their resources are absent.
    pub skipped_modules: Vec<SkippedModule>,
    /// Addresses of module instances that hit the pass limit before settling.
    pub unconverged_modules: Vec<String>,
    /// Key over the policy sources and data documents, for result caching.
    pub content_key: String,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub resolved_config: ResolvedConfig,
}

/// Run the scan use case: resolve config, find root modules, evaluate them, run policies.
pub fn run_scan(input: ScanInput<'_>) -> anyhow::Result<ScanOutput> {
    let started_at = OffsetDateTime::now_utc();

    // Parse config (empty is allowed, defaults apply).
    let cfg = if input.config_text.trim().is_empty() {
        IacguardConfigV1::default()
    } else {
        iacguard_settings::parse_config_toml(input.config_text).context("parse config")?
    };
    let resolved = iacguard_settings::resolve_config(cfg, input.overrides).context("resolve config")?;
    let cancel = input.cancel;

    let fs: Arc<dyn FileSystem> = Arc::new(FilteredFs::new(
        input.fs,
        input.root.clone(),
        resolved.filter.clone(),
    ));
    let files = fs
        .walk(&input.root, cancel)
        .with_context(|| format!("walk {}", input.root))?;
    let roots = find_root_modules(fs.as_ref(), &files);
    info!("scanning {} root module(s) under {}", roots.len(), input.root);

    let resolver = input
        .resolver
        .unwrap_or_else(|| Arc::new(DefaultResolver::new(resolved.modules.clone())) as Arc<dyn ModuleResolver>);
    let modules = evaluate_roots(&fs, &roots, resolver, &resolved, cancel)?;

    let mut sources = PolicySources::default();
    for dir in &resolved.policy_dirs {
        sources
            .policy_dirs
            .push(SourceDir::new(Arc::new(OsFs::new(dir.clone())), RepoPath::root()));
    }
    for dir in &resolved.data_dirs {
        sources
            .data_dirs
            .push(SourceDir::new(Arc::new(OsFs::new(dir.clone())), RepoPath::root()));
    }
    sources.policy_dirs.extend(input.extra_sources.policy_dirs);
    sources.data_dirs.extend(input.extra_sources.data_dirs);

    let engine = Engine::load(&sources, resolved.engine.clone(), cancel).context("load policies")?;
    let inputs: Vec<Input> = modules.iter().map(cloud_input).collect();
    let output = engine.evaluate(&inputs, cancel).context("evaluate policies")?;
    for error in &output.errors {
        warn!("rule error: {}", error);
    }

    let mut filesystems = vec![fs];
    for module in &modules {
        filesystems.extend(module.all_modules().into_iter().map(|m| m.fs.clone()));
    }
    let mut findings = output.results.into_vec();
    SourceFiles::new(filesystems).annotate(&mut findings);
    let results = Results::new(findings);

    let skipped_modules: Vec<SkippedModule> = modules
        .iter()
        .flat_map(|m| m.all_modules())
        .flat_map(|m| m.skipped.iter().cloned())
        .collect();
    let unconverged_modules: Vec<String> = modules
        .iter()
        .flat_map(|m| m.all_modules())
        .filter(|m| !m.converged)
        .map(display_address)
        .collect();

    let finished_at = OffsetDateTime::now_utc();
    info!(
        "scan finished: {} failed, {} passed, {} ignored in {} ms",
        results.failed().count(),
        results.passed().count(),
        results.ignored().count(),
        (finished_at - started_at).whole_milliseconds().max(0)
    );

    Ok(ScanOutput {
        results,
        rule_errors: output.errors,
        compile_errors: engine.compile_errors().to_vec(),
        roots,
        skipped_modules,
        unconverged_modules,
        content_key: engine.content_key().to_string(),
        started_at,
        finished_at,
        resolved_config: resolved,
    })
}

/// Evaluates each root module. A root that cannot be read is logged and skipped;
/// cancellation aborts the scan.
fn evaluate_roots(
    fs: &Arc<dyn FileSystem>,
    roots: &[RepoPath],
    resolver: Arc<dyn ModuleResolver>,
    resolved: &ResolvedConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<Vec<EvaluatedModule>> {
    let evaluator = Evaluator::new(resolver, resolved.eval.clone()).context("build evaluator")?;

    let mut modules = Vec::with_capacity(roots.len());
    for root in roots {
        match evaluator.evaluate_root(fs.clone(), root, cancel) {
            Ok(module) => {
                for m in module.all_modules() {
                    if !m.converged {
                        warn!(
                            "module {} did not settle after {} passes; using best-effort values",
                            display_address(m),
                            m.passes
                        );
                    }
                }
                modules.push(module);
            }
            Err(EvalError::Cancelled(c)) => {
                return Err(c).with_context(|| format!("evaluate root module {root}"));
            }
            Err(e) => warn!("skipping root module {}: {}", root, e),
        }
    }
    Ok(modules)
}

fn display_address(module: &EvaluatedModule) -> String {
    if module.address.is_empty() {
        module.path.to_string()
    } else {
        module.address.clone()
    }
}
