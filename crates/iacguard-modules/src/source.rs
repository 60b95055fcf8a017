use crate::error::ResolveError;
use iacguard_hcl::Value;
use iacguard_types::SourceRange;

pub const DEFAULT_REGISTRY_HOST: &str = "registry.terraform.io";

/// Classified module `source` string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleSource {
    /// `./x` or `../x`, relative to the calling module.
    Local { path: String },
    /// `[host/]namespace/name/system[//subdir]`.
    Registry {
        host: String,
        namespace: String,
        name: String,
        system: String,
        subdir: Option<String>,
    },
    Git {
        url: String,
        reference: Option<String>,
        subdir: Option<String>,
    },
    /// HTTP(S) archive.
    Http { url: String, subdir: Option<String> },
    /// Archive in cloud object storage: `s3://`, `gs://`, or an `s3::`/`gcs::` forced URL.
    Storage { url: String, subdir: Option<String> },
}

impl ModuleSource {
    pub fn parse(source: &str) -> Result<Self, ResolveError> {
        let source = source.trim();
        if source.starts_with("./") || source.starts_with("../") || source == "." || source == ".." {
            return Ok(ModuleSource::Local {
                path: source.to_string(),
            });
        }

        let (forced, rest) = match source.split_once("::") {
            Some((getter, rest)) if !getter.contains('/') && !getter.contains(':') => {
                (Some(getter), rest)
            }
            _ => (None, source),
        };

        let (base, query) = match rest.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (rest, None),
        };
        let (base, subdir) = split_subdir(base);

        match forced {
            Some("git") => return Ok(git_source(base, query, subdir)),
            Some("s3") | Some("gcs") => {
                return Ok(ModuleSource::Storage {
                    url: with_query(base, query),
                    subdir,
                });
            }
            Some("http") | Some("https") => {
                return Ok(ModuleSource::Http {
                    url: with_query(base, query),
                    subdir,
                });
            }
            Some(_) => {
                return Err(ResolveError::UnsupportedSource {
                    source_str: source.to_string(),
                });
            }
            None => {}
        }

        if base.starts_with("git@") || base.ends_with(".git") {
            return Ok(git_source(base, query, subdir));
        }
        if let Some(rest) = base.strip_prefix("github.com/").or_else(|| base.strip_prefix("bitbucket.org/")) {
            let host = if base.starts_with("github.com/") { "github.com" } else { "bitbucket.org" };
            let url = format!("https://{host}/{}.git", rest.trim_end_matches(".git"));
            return Ok(git_source(&url, query, subdir));
        }
        if base.starts_with("s3://") || base.starts_with("gs://") {
            return Ok(ModuleSource::Storage {
                url: with_query(base, query),
                subdir,
            });
        }
        if base.starts_with("https://") || base.starts_with("http://") {
            return Ok(ModuleSource::Http {
                url: with_query(base, query),
                subdir,
            });
        }

        if query.is_none()
            && let Some(registry) = registry_source(base, subdir.clone())
        {
            return Ok(registry);
        }

        Err(ResolveError::UnsupportedSource {
            source_str: source.to_string(),
        })
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ModuleSource::Local { .. })
    }

    pub fn subdir(&self) -> Option<&str> {
        match self {
            ModuleSource::Local { .. } => None,
            ModuleSource::Registry { subdir, .. }
            | ModuleSource::Git { subdir, .. }
            | ModuleSource::Http { subdir, .. }
            | ModuleSource::Storage { subdir, .. } => subdir.as_deref(),
        }
    }
}

/// Public HTTPS endpoint serving a storage object. Fetches are unauthenticated.
pub fn storage_endpoint(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("s3://") {
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        return format!("https://{bucket}.s3.amazonaws.com/{key}");
    }
    if let Some(rest) = url.strip_prefix("gs://") {
        return format!("https://storage.googleapis.com/{rest}");
    }
    url.to_string()
}

/// Splits a trailing `//subdir`, ignoring the `://` of a URL scheme.
pub fn split_subdir(source: &str) -> (&str, Option<String>) {
    let search_from = source.find("://").map(|i| i + 3).unwrap_or(0);
    match source[search_from..].find("//") {
        Some(i) => {
            let at = search_from + i;
            let subdir = source[at + 2..].trim_matches('/');
            let subdir = (!subdir.is_empty()).then(|| subdir.to_string());
            (&source[..at], subdir)
        }
        None => (source, None),
    }
}

fn with_query(base: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{base}?{q}"),
        _ => base.to_string(),
    }
}

fn git_source(base: &str, query: Option<&str>, subdir: Option<String>) -> ModuleSource {
    let mut reference = None;
    let mut rest = Vec::new();
    for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some(("ref", value)) => reference = Some(value.to_string()),
            _ => rest.push(pair),
        }
    }
    let remaining = rest.join("&");
    ModuleSource::Git {
        url: with_query(base, Some(&remaining)),
        reference,
        subdir,
    }
}

fn registry_source(base: &str, subdir: Option<String>) -> Option<ModuleSource> {
    let parts: Vec<&str> = base.split('/').collect();
    let valid = |s: &str| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    };

    let (host, rest) = match parts.len() {
        3 => (DEFAULT_REGISTRY_HOST.to_string(), &parts[..]),
        4 if parts[0].contains('.') || parts[0].contains(':') => (parts[0].to_string(), &parts[1..]),
        _ => return None,
    };
    if !rest.iter().all(|s| valid(s)) {
        return None;
    }

    Some(ModuleSource::Registry {
        host,
        namespace: rest[0].to_string(),
        name: rest[1].to_string(),
        system: rest[2].to_string(),
        subdir,
    })
}

/// Reads the evaluated `source` attribute of a module block.
pub fn source_from_value(value: Option<&Value>, range: &SourceRange) -> Result<String, ResolveError> {
    match value {
        Some(Value::String(s)) if s.trim().is_empty() => Err(ResolveError::EmptySource {
            range: range.clone(),
        }),
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(ResolveError::MissingSource {
            range: range.clone(),
        }),
    }
}
