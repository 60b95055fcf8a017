//! Config parsing and resolution into engine options.
//!
//! This crate is intentionally IO-free: it parses and resolves configuration provided as strings.

#![forbid(unsafe_code)]

mod filter;
mod model;
mod resolve;

pub use filter::ScanFilter;
pub use model::{IacguardConfigV1, ModulesConfig};
pub use resolve::{Overrides, ResolvedConfig};

/// Parse `iacguard.toml` (or equivalent) into a typed model.
pub fn parse_config_toml(input: &str) -> anyhow::Result<IacguardConfigV1> {
    let cfg: IacguardConfigV1 = toml::from_str(input)?;
    Ok(cfg)
}

/// Resolve the effective options used by the scan (config file + overrides).
pub fn resolve_config(cfg: IacguardConfigV1, overrides: Overrides) -> anyhow::Result<ResolvedConfig> {
    resolve::resolve_config(cfg, overrides)
}

/// JSON schema of [`IacguardConfigV1`].
pub fn config_schema() -> schemars::Schema {
    schemars::schema_for!(IacguardConfigV1)
}
