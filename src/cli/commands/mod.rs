pub mod account;
pub mod login;
pub mod raw;
pub mod token;

use std::path::Path;

use anyhow::Result;
use powerplatform_cli::ProviderConfig;

/// Configuration from `path` (or the default location) with environment overrides applied
pub fn load_config(path: Option<&Path>, tenant: Option<&str>) -> Result<ProviderConfig> {
    let mut config = match path {
        Some(path) => ProviderConfig::load_from(path)?,
        None => ProviderConfig::load()?,
    };
    config.apply_env_overrides()?;
    if let Some(tenant) = tenant {
        config.tenant_id = Some(tenant.to_string());
    }
    Ok(config)
}
