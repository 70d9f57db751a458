//! Host to OAuth scope resolution
//!
//! Known API hosts map to a fixed `.default` scope. Dataverse environments
//! each get a generated hostname, so they are matched by suffix and the scope
//! is derived from the host itself.

use reqwest::Url;

use super::error::{ApiError, ApiResult};
use crate::config::{CloudUrls, PPAC_SCOPE};

#[derive(Debug, Clone, Default)]
pub struct ScopeResolver {
    exact: Vec<(String, String)>,
    dataverse_suffixes: Vec<String>,
}

impl ScopeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_cloud(urls: &CloudUrls) -> Self {
        let mut resolver = Self::new();
        resolver.exact = vec![
            (urls.bapi.to_string(), urls.powerapps_scope.to_string()),
            (urls.powerapps.to_string(), urls.powerapps_scope.to_string()),
            (urls.powerplatform.to_string(), urls.powerplatform_scope.to_string()),
            (urls.licensing.to_string(), urls.powerplatform_scope.to_string()),
            (urls.advisor.to_string(), urls.advisor_scope.to_string()),
            (urls.admin.to_string(), PPAC_SCOPE.to_string()),
        ];
        resolver.dataverse_suffixes = urls
            .dataverse_suffixes
            .iter()
            .map(|s| s.to_string())
            .collect();
        resolver
    }

    /// Map `host` (and its subdomains) to `scope`, taking precedence over existing entries
    pub fn with_host(mut self, host: impl Into<String>, scope: impl Into<String>) -> Self {
        self.exact.insert(0, (host.into().to_ascii_lowercase(), scope.into()));
        self
    }

    pub fn with_dataverse_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.dataverse_suffixes.push(suffix.into().to_ascii_lowercase());
        self
    }

    pub fn resolve_scope(&self, host: &str) -> ApiResult<String> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();

        if let Some((_, scope)) = self
            .exact
            .iter()
            .find(|(known, _)| host_matches(&host, known))
        {
            return Ok(scope.clone());
        }

        if self
            .dataverse_suffixes
            .iter()
            .any(|suffix| host.ends_with(suffix.as_str()) && host.len() > suffix.len())
        {
            return Ok(format!("https://{}/.default", host));
        }

        Err(ApiError::UnknownHost { host })
    }

    pub fn resolve_url(&self, url: &Url) -> ApiResult<String> {
        let host = url.host_str().ok_or_else(|| ApiError::UrlFormat {
            url: url.to_string(),
            reason: "URL has no host".to_string(),
        })?;
        self.resolve_scope(host)
    }
}

fn host_matches(host: &str, known: &str) -> bool {
    host == known
        || host
            .strip_suffix(known)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
