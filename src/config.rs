use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Public client registered for first-party Power Platform tooling
pub const DEFAULT_CLIENT_ID: &str = "1950a258-227b-4e31-a9cf-717495945fc2";

/// Admin center API application id, used as the scope audience for the admin host
pub const PPAC_SCOPE: &str = "065d9450-1e87-434e-ac2f-69af271549ed/.default";

const APP_DIR: &str = "powerplatform-cli";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cloud {
    #[default]
    Public,
    Gcc,
    GccHigh,
    Dod,
    China,
    Ex,
    Rx,
}

/// Hosts and scopes of one sovereign cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloudUrls {
    pub authority_host: &'static str,
    pub bapi: &'static str,
    pub powerapps: &'static str,
    pub powerapps_scope: &'static str,
    pub powerplatform: &'static str,
    pub powerplatform_scope: &'static str,
    pub licensing: &'static str,
    pub advisor: &'static str,
    pub advisor_scope: &'static str,
    pub admin: &'static str,
    pub dataverse_suffixes: &'static [&'static str],
}

impl CloudUrls {
    pub fn bapi_url(&self) -> String {
        format!("https://{}", self.bapi)
    }

    pub fn powerplatform_url(&self) -> String {
        format!("https://{}", self.powerplatform)
    }

    pub fn licensing_url(&self) -> String {
        format!("https://{}", self.licensing)
    }
}

impl Cloud {
    pub const ALL: [Cloud; 7] = [
        Cloud::Public,
        Cloud::Gcc,
        Cloud::GccHigh,
        Cloud::Dod,
        Cloud::China,
        Cloud::Ex,
        Cloud::Rx,
    ];

    pub fn urls(&self) -> CloudUrls {
        match self {
            Cloud::Public => CloudUrls {
                authority_host: "https://login.microsoftonline.com/",
                bapi: "api.bap.microsoft.com",
                powerapps: "api.powerapps.com",
                powerapps_scope: "https://service.powerapps.com/.default",
                powerplatform: "api.powerplatform.com",
                powerplatform_scope: "https://api.powerplatform.com/.default",
                licensing: "licensing.powerplatform.microsoft.com",
                advisor: "api.advisor.powerapps.com",
                advisor_scope: "https://advisor.powerapps.com/.default",
                admin: "api.admin.powerplatform.microsoft.com",
                dataverse_suffixes: &[".dynamics.com"],
            },
            Cloud::Gcc => CloudUrls {
                authority_host: "https://login.microsoftonline.com/",
                bapi: "gov.api.bap.microsoft.us",
                powerapps: "gov.api.powerapps.us",
                powerapps_scope: "https://service.powerapps.us/.default",
                powerplatform: "api.gov.powerplatform.microsoft.us",
                powerplatform_scope: "https://api.gov.powerplatform.microsoft.us/.default",
                licensing: "gov.licensing.powerplatform.microsoft.us",
                advisor: "gov.api.advisor.powerapps.us",
                advisor_scope: "https://gov.advisor.powerapps.us/.default",
                admin: "api.gcc.admin.powerplatform.microsoft.us",
                dataverse_suffixes: &[".dynamics.com"],
            },
            Cloud::GccHigh => CloudUrls {
                authority_host: "https://login.microsoftonline.us/",
                bapi: "high.api.bap.microsoft.us",
                powerapps: "high.api.powerapps.us",
                powerapps_scope: "https://high.service.apps.appsplatform.us/.default",
                powerplatform: "api.high.powerplatform.microsoft.us",
                powerplatform_scope: "https://api.appsplatform.us/.default",
                licensing: "high.licensing.powerplatform.microsoft.us",
                advisor: "high.api.advisor.powerapps.us",
                advisor_scope: "https://high.advisor.powerapps.us/.default",
                admin: "api.high.admin.powerplatform.microsoft.us",
                dataverse_suffixes: &[".crm.microsoftdynamics.us"],
            },
            Cloud::Dod => CloudUrls {
                authority_host: "https://login.microsoftonline.us/",
                bapi: "api.bap.appsplatform.us",
                powerapps: "api.apps.appsplatform.us",
                powerapps_scope: "https://service.apps.appsplatform.us/.default",
                powerplatform: "api.appsplatform.us",
                powerplatform_scope: "https://api.appsplatform.us/.default",
                licensing: "licensing.appsplatform.us",
                advisor: "api.advisor.powerapps.us",
                advisor_scope: "https://advisor.powerapps.us/.default",
                admin: "api.admin.appsplatform.us",
                dataverse_suffixes: &[".crm.appsplatform.us"],
            },
            Cloud::China => CloudUrls {
                authority_host: "https://login.chinacloudapi.cn/",
                bapi: "api.bap.partner.microsoftonline.cn",
                powerapps: "api.powerapps.cn",
                powerapps_scope: "https://service.powerapps.cn/.default",
                powerplatform: "api.powerplatform.partner.microsoftonline.cn",
                powerplatform_scope: "https://api.powerplatform.partner.microsoftonline.cn/.default",
                licensing: "licensing.partner.microsoftonline.cn",
                advisor: "api.advisor.powerapps.cn",
                advisor_scope: "https://advisor.powerapps.cn/.default",
                admin: "api.ppac.partner.microsoftonline.cn",
                dataverse_suffixes: &[".dynamics.cn"],
            },
            Cloud::Ex => CloudUrls {
                authority_host: "https://login.microsoftonline.eaglex.ic.gov/",
                bapi: "api.bap.eaglex.ic.gov",
                powerapps: "api.powerapps.eaglex.ic.gov",
                powerapps_scope: "https://service.powerapps.eaglex.ic.gov/.default",
                powerplatform: "api.powerplatform.eaglex.ic.gov",
                powerplatform_scope: "https://api.powerplatform.eaglex.ic.gov/.default",
                licensing: "licensing.eaglex.ic.gov",
                advisor: "api.advisor.powerapps.eaglex.ic.gov",
                advisor_scope: "https://advisor.powerapps.eaglex.ic.gov/.default",
                admin: "api.admin.powerplatform.eaglex.ic.gov",
                dataverse_suffixes: &[".crm.microsoftdynamics.eaglex.ic.gov"],
            },
            Cloud::Rx => CloudUrls {
                authority_host: "https://login.microsoftonline.microsoft.scloud/",
                bapi: "api.bap.microsoft.scloud",
                powerapps: "api.powerapps.microsoft.scloud",
                powerapps_scope: "https://service.powerapps.microsoft.scloud/.default",
                powerplatform: "api.powerplatform.microsoft.scloud",
                powerplatform_scope: "https://api.powerplatform.microsoft.scloud/.default",
                licensing: "licensing.microsoft.scloud",
                advisor: "api.advisor.powerapps.eaglex.ic.gov",
                advisor_scope: "https://advisor.powerapps.eaglex.ic.gov/.default",
                admin: "api.admin.powerplatform.microsoft.scloud",
                dataverse_suffixes: &[".crm.microsoftdynamics.scloud"],
            },
        }
    }
}

impl fmt::Display for Cloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cloud::Public => "public",
            Cloud::Gcc => "gcc",
            Cloud::GccHigh => "gcchigh",
            Cloud::Dod => "dod",
            Cloud::China => "china",
            Cloud::Ex => "ex",
            Cloud::Rx => "rx",
        };
        f.write_str(name)
    }
}

impl FromStr for Cloud {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Cloud::ALL
            .into_iter()
            .find(|cloud| cloud.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Unknown cloud '{}'. Expected one of: public, gcc, gcchigh, dod, china, ex, rx", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub cloud: Cloud,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Service principal secret; only ever read from the environment
    #[serde(skip)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub telemetry_optout: bool,
    #[serde(default)]
    pub partner_id: Option<String>,
    #[serde(default)]
    pub use_test_mode: bool,
    /// Overrides the default token cache location
    #[serde(default)]
    pub cache_file: Option<PathBuf>,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_operation_timeout_secs() -> u64 {
    20 * 60
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            operation_timeout_secs: default_operation_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TimeoutSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            cloud: Cloud::default(),
            tenant_id: None,
            client_id: default_client_id(),
            client_secret: None,
            telemetry_optout: false,
            partner_id: None,
            use_test_mode: false,
            cache_file: None,
            timeouts: TimeoutSettings::default(),
        }
    }
}

impl ProviderConfig {
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "linux") {
            dirs::config_dir()
                .context("Failed to get XDG config directory")?
                .join(APP_DIR)
        } else {
            dirs::home_dir()
                .context("Failed to get home directory")?
                .join(format!(".{}", APP_DIR))
        };

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
            info!("Created config directory: {:?}", config_dir);
        }

        Ok(config_dir)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        debug!("Loading config from: {:?}", config_path);

        if !config_path.exists() {
            info!("Config file doesn't exist, using default config");
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: ProviderConfig = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        debug!("Loaded config for cloud {}", config.cloud);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        debug!("Saving config to: {:?}", config_path);

        let config_content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(config_path, config_content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        info!("Config saved successfully");
        Ok(())
    }

    /// Apply `POWER_PLATFORM_*` environment overrides on top of the file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(tenant_id) = lookup("POWER_PLATFORM_TENANT_ID").filter(|v| !v.is_empty()) {
            self.tenant_id = Some(tenant_id);
        }
        if let Some(client_id) = lookup("POWER_PLATFORM_CLIENT_ID").filter(|v| !v.is_empty()) {
            self.client_id = client_id;
        }
        if let Some(secret) = lookup("POWER_PLATFORM_CLIENT_SECRET").filter(|v| !v.is_empty()) {
            self.client_secret = Some(secret);
        }
        if let Some(cloud) = lookup("POWER_PLATFORM_CLOUD").filter(|v| !v.is_empty()) {
            self.cloud = cloud.parse()?;
        }
        if let Some(optout) = lookup("POWER_PLATFORM_TELEMETRY_OPTOUT") {
            self.telemetry_optout = parse_flag("POWER_PLATFORM_TELEMETRY_OPTOUT", &optout)?;
        }
        if let Some(test_mode) = lookup("POWER_PLATFORM_USE_TEST_MODE") {
            self.use_test_mode = parse_flag("POWER_PLATFORM_USE_TEST_MODE", &test_mode)?;
        }
        Ok(())
    }

    pub fn urls(&self) -> CloudUrls {
        self.cloud.urls()
    }

    /// Scopes every login must obtain so the resources can run silently afterwards
    pub fn required_scopes(&self) -> Vec<String> {
        let urls = self.urls();
        vec![
            urls.powerapps_scope.to_string(),
            urls.powerplatform_scope.to_string(),
        ]
    }

    pub fn cache_path(&self) -> Result<PathBuf> {
        match &self.cache_file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("token_cache.json")),
        }
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => anyhow::bail!("{} must be a boolean, got '{}'", name, value),
    }
}
