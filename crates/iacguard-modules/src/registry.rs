use crate::error::ResolveError;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

const DOWNLOAD_HEADER: &str = "X-Terraform-Get";

#[derive(Debug, Deserialize)]
struct Discovery {
    #[serde(rename = "modules.v1")]
    modules_v1: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VersionsResponse {
    #[serde(default)]
    modules: Vec<ModuleVersions>,
}

#[derive(Debug, Deserialize)]
struct ModuleVersions {
    #[serde(default)]
    versions: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    version: String,
}

/// Module registry client speaking the service-discovery + `modules.v1` protocol.
pub(crate) struct RegistryClient<'a> {
    client: &'a Client,
    base: Url,
}

impl<'a> RegistryClient<'a> {
    pub(crate) fn discover(client: &'a Client, host: &str) -> Result<Self, ResolveError> {
        let discovery_url = format!("https://{host}/.well-known/terraform.json");
        let discovery: Discovery = get_json(client, &discovery_url)?;
        let path = discovery.modules_v1.ok_or_else(|| ResolveError::Registry {
            url: discovery_url.clone(),
            message: "host does not provide a module registry".to_string(),
        })?;

        let base = Url::parse(&format!("https://{host}/"))
            .and_then(|root| root.join(&path))
            .map_err(|e| ResolveError::Registry {
                url: discovery_url.clone(),
                message: e.to_string(),
            })?;
        debug!("module registry for {} at {}", host, base);

        Ok(Self { client, base })
    }

    pub(crate) fn versions(&self, namespace: &str, name: &str, system: &str) -> Result<Vec<String>, ResolveError> {
        let url = self.endpoint(&format!("{namespace}/{name}/{system}/versions"))?;
        let response: VersionsResponse = get_json(self.client, url.as_str())?;
        Ok(response
            .modules
            .into_iter()
            .flat_map(|m| m.versions)
            .map(|v| v.version)
            .collect())
    }

    /// Source string of the package behind one module version.
    pub(crate) fn download_source(
        &self,
        namespace: &str,
        name: &str,
        system: &str,
        version: &str,
    ) -> Result<String, ResolveError> {
        let url = self.endpoint(&format!("{namespace}/{name}/{system}/{version}/download"))?;
        let response = self
            .client
            .get(url.as_str())
            .send()
            .map_err(|source| ResolveError::Http {
                url: url.to_string(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(ResolveError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let location = response
            .headers()
            .get(DOWNLOAD_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ResolveError::Registry {
                url: url.to_string(),
                message: format!("missing {DOWNLOAD_HEADER} header"),
            })?;
        Ok(resolve_download_location(&url, location))
    }

    fn endpoint(&self, path: &str) -> Result<Url, ResolveError> {
        self.base.join(path).map_err(|e| ResolveError::Registry {
            url: self.base.to_string(),
            message: e.to_string(),
        })
    }
}

/// Relative download locations are resolved against the download endpoint;
/// forced-getter sources (`git::`) and absolute URLs are returned untouched.
fn resolve_download_location(endpoint: &Url, location: &str) -> String {
    if location.contains("::") || location.contains("://") {
        return location.to_string();
    }
    if (location.starts_with('/') || location.starts_with("./") || location.starts_with("../"))
        && let Ok(joined) = endpoint.join(location)
    {
        return joined.to_string();
    }
    location.to_string()
}

fn get_json<T: serde::de::DeserializeOwned>(client: &Client, url: &str) -> Result<T, ResolveError> {
    let response = client.get(url).send().map_err(|source| ResolveError::Http {
        url: url.to_string(),
        source,
    })?;
    if !response.status().is_success() {
        return Err(ResolveError::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    response.json::<T>().map_err(|source| ResolveError::Http {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_locations_resolve_against_endpoint() {
        let endpoint = Url::parse("https://registry.example.com/v1/modules/acme/net/aws/1.0.0/download")
            .expect("url");
        assert_eq!(
            resolve_download_location(&endpoint, "/archives/net-1.0.0.tar.gz"),
            "https://registry.example.com/archives/net-1.0.0.tar.gz"
        );
        assert_eq!(
            resolve_download_location(&endpoint, "git::https://github.com/acme/net?ref=v1.0.0"),
            "git::https://github.com/acme/net?ref=v1.0.0"
        );
        assert_eq!(
            resolve_download_location(&endpoint, "https://cdn.example.com/net.zip"),
            "https://cdn.example.com/net.zip"
        );
    }

    #[test]
    fn versions_payload_shape() {
        let payload = r#"{"modules":[{"versions":[{"version":"1.0.0"},{"version":"1.1.0"}]}]}"#;
        let parsed: VersionsResponse = serde_json::from_str(payload).expect("parse");
        let versions: Vec<String> = parsed
            .modules
            .into_iter()
            .flat_map(|m| m.versions)
            .map(|v| v.version)
            .collect();
        assert_eq!(versions, vec!["1.0.0", "1.1.0"]);
    }
}
