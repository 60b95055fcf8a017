//! Public facade over the iacguard engine.
//!
//! Scans a directory of infrastructure-as-code, evaluates every root module to a fixpoint
//! and runs the bundled and user policies over the result:
//!
//! ```no_run
//! use iacguard::{CancellationToken, Overrides, scan_directory};
//!
//! let output = scan_directory("infra".into(), Overrides::default(), &CancellationToken::new())?;
//! for finding in output.results.failed() {
//!     println!("{} {}", finding.rule.id, finding.message);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

#![forbid(unsafe_code)]

use anyhow::Context;
use camino::Utf8PathBuf;
use iacguard_fs::{FileSystem, OsFs};
use std::sync::Arc;

pub use iacguard_app::{LogConfig, LogFormat, ScanInput, ScanOutput, init_logging, run_scan};
pub use iacguard_policy::{PolicySources, RuleError, SourceDir, TraceMode, TraceSink};
pub use iacguard_settings::Overrides;
pub use iacguard_types::{
    CancellationToken, CodeLine, Finding, Occurrence, Outcome, RepoPath, Results, RuleMetadata,
    Severity, SourceRange, Status, Suppression,
};

/// Config file looked up at the root of a scanned directory.
pub const CONFIG_FILE: &str = "iacguard.toml";

/// Scans `dir` on the local filesystem. `iacguard.toml` in `dir` is applied when present.
pub fn scan_directory(
    dir: Utf8PathBuf,
    overrides: Overrides,
    cancel: &CancellationToken,
) -> anyhow::Result<ScanOutput> {
    let fs: Arc<dyn FileSystem> = Arc::new(OsFs::new(dir.clone()));
    let config_path = RepoPath::new(CONFIG_FILE);
    let config_text = if fs.is_file(&config_path) {
        fs.read_to_string(&config_path)
            .with_context(|| format!("read {}", dir.join(CONFIG_FILE)))?
    } else {
        String::new()
    };

    run_scan(ScanInput {
        fs,
        root: RepoPath::root(),
        config_text: &config_text,
        overrides,
        extra_sources: PolicySources::default(),
        resolver: None,
        cancel,
    })
    .with_context(|| format!("scan {dir}"))
}
