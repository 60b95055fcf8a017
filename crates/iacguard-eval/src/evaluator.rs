use crate::error::EvalError;
use crate::expand::{COUNT, FOR_EACH, InstanceLimit, eval_body, has_expansion, instances};
use crate::loader::{LoadedModule, auto_var_files, load_module, load_var_file};
use crate::model::{EvaluatedAttribute, EvaluatedBlock, EvaluatedModule, InstanceKey, SkippedModule};
use crate::scope::Scope;
use iacguard_fs::FileSystem;
use iacguard_hcl::{Block, Value};
use iacguard_modules::{ModuleDefinition, ModuleRequest, ModuleResolver, ResolveError, source_from_value};
use iacguard_types::{CancellationToken, RepoPath, SourceRange};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Module block attributes that configure the call rather than feed the child's variables.
const MODULE_META_ATTRIBUTES: &[&str] = &["source", "version", COUNT, FOR_EACH, "providers", "depends_on"];

#[derive(Clone, Debug)]
pub struct EvalOptions {
    /// Upper bound on fixpoint passes per module instance.
    pub max_passes: usize,
    /// Upper bound on the copies a single `count`, `for_each` or `dynamic` expansion produces.
    /// Larger expansions keep their first copies and leave the module marked as not converged.
    pub max_instances: usize,
    pub workspace: String,
    /// Extra variable files for the root module, relative to its filesystem. Later files win.
    pub var_files: Vec<RepoPath>,
    pub load_auto_tfvars: bool,
    /// Worker threads for sibling module evaluation; `1` evaluates sequentially.
    pub parallelism: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            max_passes: 32,
            max_instances: 1024,
            workspace: "default".to_string(),
            var_files: Vec::new(),
            load_auto_tfvars: true,
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Where a module instance lives and what it was given.
struct Frame<'a> {
    fs: &'a Arc<dyn FileSystem>,
    dir: &'a RepoPath,
    root_fs: &'a Arc<dyn FileSystem>,
    project_root: &'a RepoPath,
    /// Dotted module-name chain used as the cache manifest key.
    key: &'a str,
    /// Identities of the modules on the path from the root, this one included.
    chain: &'a [String],
    inputs: &'a BTreeMap<String, Value>,
    var_files: &'a BTreeMap<String, Value>,
}

struct ModuleCall {
    block_index: usize,
    name: String,
    key: String,
    definition: Result<ModuleDefinition, String>,
}

struct ChildJob<'a> {
    name: &'a str,
    key: &'a str,
    definition: &'a ModuleDefinition,
    instance: InstanceKey,
    address: String,
    inputs: BTreeMap<String, Value>,
    call_site: SourceRange,
}

#[derive(Default)]
struct PassOutcome {
    blocks: Vec<EvaluatedBlock>,
    locals: BTreeMap<String, Value>,
    resources: BTreeMap<String, BTreeMap<String, Value>>,
    data: BTreeMap<String, BTreeMap<String, Value>>,
    modules: BTreeMap<String, Value>,
    outputs: BTreeMap<String, Value>,
    children: Vec<EvaluatedModule>,
    skipped: Vec<SkippedModule>,
    truncated: bool,
}

impl PassOutcome {
    /// Module context for the next pass.
    fn context(&self, base: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        let mut ctx = base.clone();
        for (kind, names) in &self.resources {
            ctx.entry(kind.clone()).or_insert_with(|| Value::Map(names.clone()));
        }
        ctx.insert("local".to_string(), Value::Map(self.locals.clone()));
        ctx.insert("module".to_string(), Value::Map(self.modules.clone()));
        ctx.insert(
            "data".to_string(),
            Value::Map(
                self.data
                    .iter()
                    .map(|(k, names)| (k.clone(), Value::Map(names.clone())))
                    .collect(),
            ),
        );
        ctx
    }
}

/// Builds evaluated module trees.
///
/// Each module instance owns its context for the duration of its fixpoint loop; sibling
/// child modules are evaluated on a bounded worker pool. Child results are cached by
/// resolved location and input values, so a module called twice with the same inputs is
/// evaluated once and placed under both call sites.
pub struct Evaluator {
    resolver: Arc<dyn ModuleResolver>,
    options: EvalOptions,
    pool: Option<rayon::ThreadPool>,
    cache: Mutex<HashMap<String, Arc<EvaluatedModule>>>,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("resolver", &self.resolver)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Evaluator {
    pub fn new(resolver: Arc<dyn ModuleResolver>, options: EvalOptions) -> Result<Self, EvalError> {
        let pool = if options.parallelism > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(options.parallelism)
                    .thread_name(|i| format!("iacguard-eval-{i}"))
                    .build()
                    .map_err(|e| EvalError::WorkerPool(e.to_string()))?,
            )
        } else {
            None
        };
        Ok(Self {
            resolver,
            options,
            pool,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    /// Evaluates the root module in `dir` and every module it (transitively) calls.
    pub fn evaluate_root(
        &self,
        fs: Arc<dyn FileSystem>,
        dir: &RepoPath,
        cancel: &CancellationToken,
    ) -> Result<EvaluatedModule, EvalError> {
        let mut files = Vec::new();
        if self.options.load_auto_tfvars {
            files.extend(auto_var_files(fs.as_ref(), dir));
        }
        files.extend(self.options.var_files.iter().cloned());

        let mut var_files = BTreeMap::new();
        for path in &files {
            if let Some(values) = load_var_file(fs.as_ref(), path) {
                debug!("loaded {} variable(s) from {}", values.len(), path);
                var_files.extend(values);
            }
        }

        let chain = vec![identity(fs.as_ref(), dir)];
        let inputs = BTreeMap::new();
        let frame = Frame {
            fs: &fs,
            dir,
            root_fs: &fs,
            project_root: dir,
            key: "",
            chain: &chain,
            inputs: &inputs,
            var_files: &var_files,
        };

        info!("evaluating root module {}", dir);
        let mut module = self.evaluate_module(&frame, cancel)?;
        module.name = "root".to_string();
        Ok(module)
    }

    /// Runs one module instance to its fixpoint. Addresses in the result are relative to
    /// the instance; callers rebase them with [`EvaluatedModule::instantiate`].
    fn evaluate_module(&self, frame: &Frame<'_>, cancel: &CancellationToken) -> Result<EvaluatedModule, EvalError> {
        cancel.check()?;
        let loaded = load_module(frame.fs.as_ref(), frame.dir)?;
        let mut skipped = Vec::new();
        let calls = self.resolve_calls(frame, &loaded, &mut skipped, cancel)?;
        let base = self.base_context(frame, &loaded);

        let mut ctx = PassOutcome::default().context(&base);
        let mut last = PassOutcome::default();
        let mut converged = false;
        let mut passes = 0;

        while passes < self.options.max_passes.max(1) {
            cancel.check()?;
            passes += 1;
            let outcome = self.run_pass(frame, &loaded, &calls, &ctx, cancel)?;
            let next = outcome.context(&base);
            converged = next == ctx;
            ctx = next;
            last = outcome;
            if converged {
                break;
            }
        }

        if last.truncated {
            warn!(
                "module {} expands a block past {} copies; keeping the first ones",
                frame.dir, self.options.max_instances
            );
            converged = false;
        } else if converged {
            debug!("module {} converged after {} pass(es)", frame.dir, passes);
        } else {
            warn!(
                "module {} did not converge after {} passes; using best-effort values",
                frame.dir, passes
            );
        }

        skipped.extend(last.skipped);
        Ok(EvaluatedModule {
            name: String::new(),
            fs: Arc::clone(frame.fs),
            path: frame.dir.clone(),
            address: String::new(),
            source: None,
            external: false,
            blocks: last.blocks,
            outputs: last.outputs,
            children: last.children,
            skipped,
            converged,
            passes,
            call_site: None,
        })
    }

    fn base_context(&self, frame: &Frame<'_>, loaded: &LoadedModule) -> BTreeMap<String, Value> {
        let defaults = Scope::empty();
        let mut vars = BTreeMap::new();
        for block in loaded.blocks.iter().filter(|b| b.kind == "variable") {
            let Some(name) = block.type_label() else {
                continue;
            };
            let value = frame
                .inputs
                .get(name)
                .filter(|v| !v.is_null())
                .or_else(|| frame.var_files.get(name))
                .cloned()
                .or_else(|| block.attribute("default").map(|a| defaults.eval(&a.expr)))
                .unwrap_or(Value::Unknown);
            vars.insert(name.to_string(), value);
        }

        let path = BTreeMap::from([
            ("module".to_string(), Value::string(frame.dir.as_str())),
            ("root".to_string(), Value::string(frame.project_root.as_str())),
            // Relative to the scanned filesystem, never the host process.
            ("cwd".to_string(), Value::string(frame.project_root.as_str())),
        ]);
        let terraform = BTreeMap::from([(
            "workspace".to_string(),
            Value::string(self.options.workspace.clone()),
        )]);

        BTreeMap::from([
            ("var".to_string(), Value::Map(vars)),
            ("path".to_string(), Value::Map(path)),
            ("terraform".to_string(), Value::Map(terraform)),
        ])
    }

    fn resolve_calls(
        &self,
        frame: &Frame<'_>,
        loaded: &LoadedModule,
        skipped: &mut Vec<SkippedModule>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ModuleCall>, EvalError> {
        let mut calls = Vec::new();
        let literal = Scope::empty();

        for (block_index, block) in loaded.blocks.iter().enumerate() {
            if block.kind != "module" {
                continue;
            }
            let Some(name) = block.type_label() else {
                continue;
            };
            cancel.check()?;

            let key = if frame.key.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", frame.key, name)
            };
            let source = block.attribute("source").map(|a| literal.eval(&a.expr));
            let version = block
                .attribute("version")
                .and_then(|a| literal.eval(&a.expr).to_template_string());

            let resolved = source_from_value(source.as_ref(), &block.range).and_then(|source| {
                let request = ModuleRequest {
                    name,
                    key: &key,
                    source: &source,
                    version: version.as_deref(),
                    range: &block.range,
                    caller_fs: frame.fs,
                    caller_dir: frame.dir,
                    root_fs: frame.root_fs,
                    project_root: frame.project_root,
                };
                let definition = self.resolver.resolve(&request, cancel)?;
                let id = identity(definition.fs.as_ref(), &definition.path);
                if frame.chain.contains(&id) {
                    let mut chain = frame.chain.to_vec();
                    chain.push(id);
                    return Err(ResolveError::Cycle {
                        chain: chain.join(" -> "),
                    });
                }
                Ok(definition)
            });

            let definition = match resolved {
                Ok(definition) => {
                    debug!("module {} resolved to {}", key, definition.path);
                    Ok(definition)
                }
                Err(ResolveError::Cancelled(c)) => return Err(c.into()),
                Err(e) => {
                    warn!("skipping module {}: {}", key, e);
                    skipped.push(SkippedModule {
                        address: format!("module.{name}"),
                        range: block.range.clone(),
                        reason: e.to_string(),
                    });
                    Err(e.to_string())
                }
            };
            calls.push(ModuleCall {
                block_index,
                name: name.to_string(),
                key,
                definition,
            });
        }
        Ok(calls)
    }

    fn run_pass(
        &self,
        frame: &Frame<'_>,
        loaded: &LoadedModule,
        calls: &[ModuleCall],
        ctx: &BTreeMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<PassOutcome, EvalError> {
        let scope = Scope::new(ctx);
        let limit = InstanceLimit::new(self.options.max_instances);
        let mut out = PassOutcome::default();
        let mut jobs = Vec::new();

        for (index, block) in loaded.blocks.iter().enumerate() {
            match block.kind.as_str() {
                "resource" | "data" => {
                    let (Some(kind), Some(name)) = (block.labels.first(), block.labels.get(1)) else {
                        continue;
                    };
                    let prefix = if block.kind == "data" {
                        format!("data.{kind}.{name}")
                    } else {
                        format!("{kind}.{name}")
                    };
                    let table = if block.kind == "data" {
                        out.data.entry(kind.clone()).or_default()
                    } else {
                        out.resources.entry(kind.clone()).or_default()
                    };
                    seed_collection(table, name, block);

                    for instance in instances(block, &scope, &limit) {
                        let inner = instance.scope(&scope);
                        let address = format!("{prefix}{}", instance.key.suffix());
                        let (attributes, blocks) = eval_body(block, &inner, &address, &limit);
                        let evaluated = top_block(block, address, attributes, blocks);
                        insert_instance(table, name, &instance.key, evaluated.to_value());
                        out.blocks.push(evaluated);
                    }
                }
                "module" => {
                    let Some(name) = block.type_label() else {
                        continue;
                    };
                    seed_collection(&mut out.modules, name, block);
                    let call = calls.iter().find(|c| c.block_index == index);

                    for instance in instances(block, &scope, &limit) {
                        let inner = instance.scope(&scope);
                        let address = format!("module.{name}{}", instance.key.suffix());
                        let (attributes, blocks) = eval_body(block, &inner, &address, &limit);
                        if let Some(call) = call
                            && let Ok(definition) = &call.definition
                        {
                            jobs.push(ChildJob {
                                name: &call.name,
                                key: &call.key,
                                definition,
                                instance: instance.key.clone(),
                                address: address.clone(),
                                inputs: module_inputs(&attributes),
                                call_site: block.range.clone(),
                            });
                        }
                        out.blocks.push(top_block(block, address, attributes, blocks));
                    }
                }
                "locals" => {
                    let (attributes, blocks) = eval_body(block, &scope, "locals", &limit);
                    out.locals
                        .extend(attributes.iter().map(|(k, a)| (k.clone(), a.value.clone())));
                    out.blocks.push(top_block(block, "locals".to_string(), attributes, blocks));
                }
                "output" => {
                    let Some(name) = block.type_label() else {
                        continue;
                    };
                    let address = format!("output.{name}");
                    let (attributes, blocks) = eval_body(block, &scope, &address, &limit);
                    let value = attributes
                        .get("value")
                        .map(|a| a.value.clone())
                        .unwrap_or(Value::Null);
                    out.outputs.insert(name.to_string(), value);
                    out.blocks.push(top_block(block, address, attributes, blocks));
                }
                "variable" => {
                    let Some(name) = block.type_label() else {
                        continue;
                    };
                    let address = format!("var.{name}");
                    let (attributes, blocks) = eval_body(block, &scope, &address, &limit);
                    out.blocks.push(top_block(block, address, attributes, blocks));
                }
                _ => {
                    let address = std::iter::once(block.kind.as_str())
                        .chain(block.labels.iter().map(String::as_str))
                        .collect::<Vec<_>>()
                        .join(".");
                    let (attributes, blocks) = eval_body(block, &scope, &address, &limit);
                    out.blocks.push(top_block(block, address, attributes, blocks));
                }
            }
        }

        out.truncated = limit.was_hit();

        for (job, result) in self.run_children(frame, &jobs, cancel) {
            match result {
                Ok(child) => {
                    insert_instance(
                        &mut out.modules,
                        job.name,
                        &job.instance,
                        Value::Map(child.outputs.clone()),
                    );
                    out.children.push(child);
                }
                Err(EvalError::Cancelled(c)) => return Err(c.into()),
                Err(e) => {
                    warn!("skipping module {}: {}", job.address, e);
                    out.skipped.push(SkippedModule {
                        address: job.address.clone(),
                        range: job.call_site.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(out)
    }

    fn run_children<'j>(
        &self,
        frame: &Frame<'_>,
        jobs: &'j [ChildJob<'j>],
        cancel: &CancellationToken,
    ) -> Vec<(&'j ChildJob<'j>, Result<EvaluatedModule, EvalError>)> {
        let run = |job: &'j ChildJob<'j>| (job, self.evaluate_child(frame, job, cancel));
        match &self.pool {
            Some(pool) if jobs.len() > 1 => pool.install(|| jobs.par_iter().map(run).collect()),
            _ => jobs.iter().map(run).collect(),
        }
    }

    fn evaluate_child(
        &self,
        frame: &Frame<'_>,
        job: &ChildJob<'_>,
        cancel: &CancellationToken,
    ) -> Result<EvaluatedModule, EvalError> {
        let definition = job.definition;
        let id = identity(definition.fs.as_ref(), &definition.path);
        let cache_key = format!("{id}|{:?}", job.inputs);

        let cached = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&cache_key)
            .cloned();
        if let Some(hit) = cached {
            debug!("module {} served from evaluation cache", job.address);
            return Ok(hit.instantiate(job.name, &job.address, &job.call_site));
        }

        let mut chain = frame.chain.to_vec();
        chain.push(id);
        let no_var_files = BTreeMap::new();
        let child_frame = Frame {
            fs: &definition.fs,
            dir: &definition.path,
            root_fs: frame.root_fs,
            project_root: frame.project_root,
            key: job.key,
            chain: &chain,
            inputs: &job.inputs,
            var_files: &no_var_files,
        };

        let mut module = self.evaluate_module(&child_frame, cancel)?;
        module.source = Some(definition.source.clone());
        module.external = definition.external;
        let module = Arc::new(module);
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(cache_key, Arc::clone(&module));

        Ok(module.instantiate(job.name, &job.address, &job.call_site))
    }
}

fn identity(fs: &dyn FileSystem, path: &RepoPath) -> String {
    format!("{}:{}", fs.location(), path)
}

fn module_inputs(attributes: &BTreeMap<String, EvaluatedAttribute>) -> BTreeMap<String, Value> {
    attributes
        .iter()
        .filter(|(name, _)| !MODULE_META_ATTRIBUTES.contains(&name.as_str()))
        .map(|(name, attr)| (name.clone(), attr.value.clone()))
        .collect()
}

fn top_block(
    block: &Block,
    address: String,
    attributes: BTreeMap<String, EvaluatedAttribute>,
    blocks: Vec<EvaluatedBlock>,
) -> EvaluatedBlock {
    let typed = matches!(block.kind.as_str(), "resource" | "data");
    EvaluatedBlock {
        kind: block.kind.clone(),
        type_label: if typed { block.type_label().map(str::to_string) } else { None },
        name: block.name_label().map(str::to_string),
        address,
        labels: block.labels.clone(),
        attributes,
        blocks,
        range: block.range.clone(),
        module_address: String::new(),
        call_sites: Vec::new(),
    }
}

/// Expanded blocks are referenced as a list (`count`) or map (`for_each`) even with no copies.
fn seed_collection(table: &mut BTreeMap<String, Value>, name: &str, block: &Block) {
    if !has_expansion(block) {
        return;
    }
    let empty = if block.attribute(COUNT).is_some() {
        Value::List(Vec::new())
    } else {
        Value::Map(BTreeMap::new())
    };
    table.insert(name.to_string(), empty);
}

fn insert_instance(table: &mut BTreeMap<String, Value>, name: &str, key: &InstanceKey, value: Value) {
    match key {
        InstanceKey::None => {
            table.insert(name.to_string(), value);
        }
        InstanceKey::Index(_) => match table.entry(name.to_string()).or_insert_with(|| Value::List(Vec::new())) {
            Value::List(items) => items.push(value),
            other => *other = Value::List(vec![value]),
        },
        InstanceKey::Key(k) => match table.entry(name.to_string()).or_insert_with(|| Value::Map(BTreeMap::new())) {
            Value::Map(map) => {
                map.insert(k.clone(), value);
            }
            other => *other = Value::Map(BTreeMap::from([(k.clone(), value)])),
        },
    }
}
