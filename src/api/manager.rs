use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info};

use super::client::{ApiClient, build_http_client};
use super::poller::{OperationPoller, PollConfig};
use super::scope::ScopeResolver;
use crate::auth::{
    CachePersistence, FileCachePersistence, IdentityClient, MemoryCachePersistence, StaticTokenSource,
    TokenCache, TokenProvider, TokenSource,
};
use crate::config::ProviderConfig;
use crate::services::{ApplicationClient, EnvironmentClient, LicensingClient, ServiceEndpoints, SolutionClient};

/// Bearer token sent by every request in test mode
pub const TEST_MODE_TOKEN: &str = "test-mode-token";

/// Provider client built once from configuration and shared by every caller.
///
/// Owns the HTTP client, the token cache and provider, the executor and the
/// poller; the service clients are cheap handles onto the same executor.
pub struct ClientManager {
    config: ProviderConfig,
    token_provider: Arc<TokenProvider>,
    api: ApiClient,
    poller: OperationPoller,
    endpoints: ServiceEndpoints,
}

impl ClientManager {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let persistence: Arc<dyn CachePersistence> = if config.use_test_mode {
            Arc::new(MemoryCachePersistence::new())
        } else {
            let cache_path = config.cache_path()?;
            debug!("Using token cache at {:?}", cache_path);
            Arc::new(FileCachePersistence::new(cache_path))
        };
        let scopes = ScopeResolver::for_cloud(&config.urls());
        let endpoints = ServiceEndpoints::for_cloud(&config.urls());
        Self::with_parts(config, persistence, scopes, endpoints)
    }

    /// Build against explicit persistence, scope table and base URLs
    pub fn with_parts(
        config: ProviderConfig,
        persistence: Arc<dyn CachePersistence>,
        scopes: ScopeResolver,
        endpoints: ServiceEndpoints,
    ) -> Result<Self> {
        let http_client =
            build_http_client(config.timeouts.request_timeout()).context("Failed to build HTTP client")?;

        let urls = config.urls();
        let identity = IdentityClient::new(http_client.clone(), config.client_id.clone());
        let token_provider = Arc::new(
            TokenProvider::new(Arc::new(TokenCache::new(persistence)), identity, urls.authority_host)
                .with_tenant(config.tenant_id.clone())
                .with_client_secret(config.client_secret.clone()),
        );
        Self::assemble(config, http_client, token_provider, scopes, endpoints)
    }

    /// Build against an already configured token provider
    pub fn with_token_provider(
        config: ProviderConfig,
        token_provider: Arc<TokenProvider>,
        scopes: ScopeResolver,
        endpoints: ServiceEndpoints,
    ) -> Result<Self> {
        let http_client =
            build_http_client(config.timeouts.request_timeout()).context("Failed to build HTTP client")?;
        Self::assemble(config, http_client, token_provider, scopes, endpoints)
    }

    fn assemble(
        config: ProviderConfig,
        http_client: reqwest::Client,
        token_provider: Arc<TokenProvider>,
        scopes: ScopeResolver,
        endpoints: ServiceEndpoints,
    ) -> Result<Self> {
        let tokens: Arc<dyn TokenSource> = if config.use_test_mode {
            info!("Test mode enabled, using a static bearer token");
            Arc::new(StaticTokenSource::new(TEST_MODE_TOKEN))
        } else {
            token_provider.clone()
        };

        let api = ApiClient::new(http_client, tokens, scopes)
            .with_telemetry_optout(config.telemetry_optout)
            .with_partner_id(config.partner_id.clone());
        let poller = OperationPoller::new(
            api.clone(),
            PollConfig {
                interval: config.timeouts.poll_interval(),
                timeout: config.timeouts.operation_timeout(),
            },
        );

        Ok(Self {
            config,
            token_provider,
            api,
            poller,
            endpoints,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn token_provider(&self) -> &Arc<TokenProvider> {
        &self.token_provider
    }

    pub fn poller(&self) -> &OperationPoller {
        &self.poller
    }

    pub fn endpoints(&self) -> &ServiceEndpoints {
        &self.endpoints
    }

    pub fn environments(&self) -> EnvironmentClient {
        EnvironmentClient::new(self.api.clone(), self.poller.clone(), self.endpoints.clone())
    }

    pub fn solutions(&self) -> SolutionClient {
        SolutionClient::new(self.api.clone(), self.poller.clone())
    }

    pub fn applications(&self) -> ApplicationClient {
        ApplicationClient::new(self.api.clone(), self.poller.clone(), self.endpoints.clone())
    }

    pub fn licensing(&self) -> LicensingClient {
        LicensingClient::new(self.api.clone(), self.poller.clone(), self.endpoints.clone())
    }
}
