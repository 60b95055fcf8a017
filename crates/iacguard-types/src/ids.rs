//! Stable identifiers for namespaces, rule prefixes and input types.
//!
//! Namespaces are dotted package names. Rule names carry a `deny`, `warn` or `allow` prefix.

// Namespaces
pub const NAMESPACE_BUILTIN: &str = "builtin";
pub const NAMESPACE_DEFSEC: &str = "defsec";
pub const NAMESPACE_APPSHIELD: &str = "appshield";

/// Root namespaces that always run, regardless of the caller's allow-list.
pub const BUILTIN_NAMESPACES: &[&str] = &[NAMESPACE_BUILTIN, NAMESPACE_DEFSEC, NAMESPACE_APPSHIELD];

/// Package holding namespace-level exceptions.
pub const NAMESPACE_EXCEPTIONS: &str = "namespace.exceptions";

/// Packages under this root contribute reusable predicates instead of rules.
pub const NAMESPACE_LIB: &str = "lib";

/// Namespace root for the compiled-in checks.
pub const NAMESPACE_NATIVE: &str = "builtin.native";

// Rule prefixes
pub const RULE_PREFIX_DENY: &str = "deny";
pub const RULE_PREFIX_WARN: &str = "warn";
pub const RULE_PREFIX_ALLOW: &str = "allow";

// Input types
pub const INPUT_TYPE_CLOUD: &str = "cloud";
/// Legacy alias of [`INPUT_TYPE_CLOUD`].
pub const INPUT_TYPE_DEFSEC: &str = "defsec";

// Native checks
pub const CHECK_AWS_S3_PUBLIC_ACL: &str = "IAC-AWS-0001";
pub const CHECK_AWS_SG_DESCRIPTION: &str = "IAC-AWS-0002";

/// Returns true when `namespace` lives under one of the built-in roots.
pub fn is_builtin_namespace(namespace: &str) -> bool {
    let root = namespace.split('.').next().unwrap_or_default();
    BUILTIN_NAMESPACES.contains(&root)
}

/// Exact or dotted-prefix namespace match: `users` matches `users` and `users.my_rule`,
/// never `users_extra` or `something.users`.
pub fn namespace_matches(namespace: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    namespace == prefix
        || namespace
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Canonical input type: `defsec` is folded into `cloud`.
pub fn canonical_input_type(kind: &str) -> &str {
    if kind == INPUT_TYPE_DEFSEC {
        INPUT_TYPE_CLOUD
    } else {
        kind
    }
}
