/// Authority used when no tenant is configured
pub const ORGANIZATIONS: &str = "organizations";

/// OAuth authority: the identity host plus a tenant segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    host: String,
    tenant: String,
}

impl Authority {
    pub fn new(authority_host: &str, tenant: Option<&str>) -> Self {
        let tenant = tenant
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(ORGANIZATIONS);
        Self {
            host: authority_host.trim_end_matches('/').to_string(),
            tenant: tenant.to_string(),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn is_organizations(&self) -> bool {
        self.tenant == ORGANIZATIONS
    }

    pub fn url(&self) -> String {
        format!("{}/{}", self.host, self.tenant)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.url())
    }

    pub fn device_code_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/devicecode", self.url())
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.url())
    }
}
