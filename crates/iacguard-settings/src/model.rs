use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `iacguard.toml` schema v1.
///
/// Every field is optional; unset fields fall back to engine defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct IacguardConfigV1 {
    /// Optional schema string for tooling (`iacguard.config.v1`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Directories with user rule files (`*.toml`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_dirs: Vec<String>,

    /// Directories with JSON/TOML documents exposed to rules as `data`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_dirs: Vec<String>,

    /// Namespaces to run besides the built-in roots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// Variable files applied to every root module, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub var_files: Vec<String>,

    /// Glob patterns for directories to leave out of the walk, e.g. `**/.terraform/**`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_dirs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_files: Vec<String>,

    /// Run declarative rules only; native checks are disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_only: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_policies: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_libraries: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_deprecated: Option<bool>,

    /// Rule runtime errors tolerated before the policy run aborts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_limit: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,

    /// `off` (default), `global` or `per-result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,

    /// Fixpoint pass limit per module instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_passes: Option<u32>,

    /// Copies kept per `count`, `for_each` or `dynamic` expansion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    /// Load `terraform.tfvars` and `*.auto.tfvars` from root modules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_var_files: Option<bool>,

    #[serde(default)]
    pub modules: ModulesConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ModulesConfig {
    /// Download cache for remote modules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_downloads: Option<bool>,

    /// Fetch again even when a cache entry exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_cache: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_timeout_secs: Option<u64>,
}
