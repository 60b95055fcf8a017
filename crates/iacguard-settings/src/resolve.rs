use crate::filter::ScanFilter;
use crate::model::IacguardConfigV1;
use camino::Utf8PathBuf;
use iacguard_eval::EvalOptions;
use iacguard_modules::ResolverOptions;
use iacguard_policy::{EngineOptions, LogSink, TraceMode};
use iacguard_types::RepoPath;
use std::sync::Arc;
use std::time::Duration;

/// Caller-supplied values. Set fields take precedence over the config file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub policy_dirs: Vec<String>,
    pub data_dirs: Vec<String>,
    pub namespaces: Vec<String>,
    pub var_files: Vec<String>,
    pub skip_dirs: Vec<String>,
    pub skip_files: Vec<String>,
    pub rules_only: Option<bool>,
    pub include_deprecated: Option<bool>,
    pub error_limit: Option<u32>,
    pub parallelism: Option<u32>,
    pub trace: Option<String>,
    pub workspace: Option<String>,
    pub allow_downloads: Option<bool>,
    pub skip_cache: Option<bool>,
    pub cache_dir: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ResolvedConfig {
    pub policy_dirs: Vec<Utf8PathBuf>,
    pub data_dirs: Vec<Utf8PathBuf>,
    pub filter: ScanFilter,
    pub engine: EngineOptions,
    pub eval: EvalOptions,
    pub modules: ResolverOptions,
}

fn pick(overridden: Vec<String>, configured: Vec<String>) -> Vec<String> {
    if overridden.is_empty() {
        configured
    } else {
        overridden
    }
}

pub fn resolve_config(cfg: IacguardConfigV1, overrides: Overrides) -> anyhow::Result<ResolvedConfig> {
    let skip_dirs = pick(overrides.skip_dirs, cfg.skip_dirs);
    let skip_files = pick(overrides.skip_files, cfg.skip_files);
    let filter = ScanFilter::new(&skip_dirs, &skip_files)?;

    let mut engine = EngineOptions {
        namespaces: pick(overrides.namespaces, cfg.namespaces),
        ..EngineOptions::default()
    };
    for namespace in &engine.namespaces {
        if namespace.trim().is_empty() || namespace.starts_with('.') || namespace.ends_with('.') {
            anyhow::bail!("invalid namespace: {namespace:?}");
        }
    }
    if let Some(v) = overrides.rules_only.or(cfg.rules_only) {
        engine.rules_only = v;
    }
    if let Some(v) = cfg.embedded_policies {
        engine.embedded_policies = v;
    }
    if let Some(v) = cfg.embedded_libraries {
        engine.embedded_libraries = v;
    }
    if let Some(v) = overrides.include_deprecated.or(cfg.include_deprecated) {
        engine.include_deprecated = v;
    }
    if let Some(v) = overrides.error_limit.or(cfg.error_limit) {
        engine.error_limit = v as usize;
    }
    let parallelism = overrides.parallelism.or(cfg.parallelism);
    if let Some(v) = parallelism {
        if v == 0 {
            anyhow::bail!("parallelism must be at least 1");
        }
        engine.parallelism = v as usize;
    }
    if let Some(trace) = overrides.trace.or(cfg.trace) {
        engine.trace = parse_trace(&trace)?;
    }

    let mut eval = EvalOptions {
        parallelism: engine.parallelism,
        var_files: pick(overrides.var_files, cfg.var_files)
            .iter()
            .map(RepoPath::new)
            .collect(),
        ..EvalOptions::default()
    };
    if let Some(v) = cfg.max_passes {
        if v == 0 {
            anyhow::bail!("max_passes must be at least 1");
        }
        eval.max_passes = v as usize;
    }
    if let Some(v) = cfg.max_instances {
        if v == 0 {
            anyhow::bail!("max_instances must be at least 1");
        }
        eval.max_instances = v as usize;
    }
    if let Some(v) = overrides.workspace.or(cfg.workspace) {
        eval.workspace = v;
    }
    if let Some(v) = cfg.auto_var_files {
        eval.load_auto_tfvars = v;
    }

    let mut modules = ResolverOptions::default();
    if let Some(dir) = overrides.cache_dir.or(cfg.modules.cache_dir) {
        modules.cache_dir = Utf8PathBuf::from(dir);
    }
    if let Some(v) = overrides.allow_downloads.or(cfg.modules.allow_downloads) {
        modules.allow_downloads = v;
    }
    if let Some(v) = overrides.skip_cache.or(cfg.modules.skip_cache) {
        modules.skip_cache = v;
    }
    if let Some(secs) = cfg.modules.registry_timeout_secs {
        modules.timeout = Duration::from_secs(secs);
    }

    let dirs = |v: Vec<String>| v.into_iter().map(Utf8PathBuf::from).collect();
    Ok(ResolvedConfig {
        policy_dirs: dirs(pick(overrides.policy_dirs, cfg.policy_dirs)),
        data_dirs: dirs(pick(overrides.data_dirs, cfg.data_dirs)),
        filter,
        engine,
        eval,
        modules,
    })
}

fn parse_trace(v: &str) -> anyhow::Result<TraceMode> {
    match v {
        "off" => Ok(TraceMode::Off),
        "global" => Ok(TraceMode::Global(Arc::new(LogSink))),
        "per-result" | "per_result" => Ok(TraceMode::PerResult),
        other => anyhow::bail!("unknown trace mode: {other} (expected off|global|per-result)"),
    }
}
