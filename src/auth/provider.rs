//! Token acquisition across the silent, device code, username/password,
//! client secret and interactive browser flows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use super::authority::Authority;
use super::cache::TokenCache;
use super::error::AuthError;
use super::identity::{DeviceCodeResponse, IdentityClient, TokenResponse};
use super::interactive::{self, RedirectListener};
use super::token::{AccountIdentity, Token};
use crate::api::CallContext;

/// Tokens are refreshed this long before they expire
const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Silent,
    DeviceCode,
    UsernamePassword,
    Interactive,
    /// Service principal sign-in with the configured client id and secret
    ClientSecret,
}

#[derive(Clone)]
pub struct UserCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Bearer tokens for the HTTP executor. Only silent acquisition happens behind this seam.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Token for `scope`; `force_refresh` bypasses any cached access token
    async fn token_for_scope(&self, ctx: &CallContext, scope: &str, force_refresh: bool) -> Result<String, AuthError>;
}

/// Fixed token, used in test mode
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token_for_scope(&self, _ctx: &CallContext, _scope: &str, _force_refresh: bool) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}

pub type DeviceCodePrompt = Arc<dyn Fn(&DeviceCodeResponse) + Send + Sync>;

pub struct TokenProvider {
    cache: Arc<TokenCache>,
    identity: IdentityClient,
    authority_host: String,
    tenant_id: Option<String>,
    refresh_skew: chrono::Duration,
    device_code_prompt: DeviceCodePrompt,
    client_secret: Option<String>,
}

impl TokenProvider {
    pub fn new(cache: Arc<TokenCache>, identity: IdentityClient, authority_host: impl Into<String>) -> Self {
        Self {
            cache,
            identity,
            authority_host: authority_host.into(),
            tenant_id: None,
            refresh_skew: chrono::Duration::from_std(DEFAULT_REFRESH_SKEW)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            device_code_prompt: Arc::new(print_device_code),
            client_secret: None,
        }
    }

    /// Sign in as the service principal `client_id` instead of a user.
    /// Silent acquisition then runs the client credentials grant.
    pub fn with_client_secret(mut self, client_secret: Option<String>) -> Self {
        self.client_secret = client_secret.filter(|s| !s.is_empty());
        self
    }

    pub fn uses_client_secret(&self) -> bool {
        self.client_secret.is_some()
    }

    /// Tenant used when a call does not name one
    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero());
        self
    }

    pub fn with_device_code_prompt(mut self, prompt: DeviceCodePrompt) -> Self {
        self.device_code_prompt = prompt;
        self
    }

    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn authority(&self, tenant: Option<&str>) -> Authority {
        Authority::new(&self.authority_host, tenant.or(self.tenant_id.as_deref()))
    }

    pub async fn acquire(
        &self,
        ctx: &CallContext,
        tenant: Option<&str>,
        scope: &str,
        mode: AuthMode,
        credentials: Option<&UserCredentials>,
    ) -> Result<Token, AuthError> {
        let tenant = tenant.or(self.tenant_id.as_deref());
        match mode {
            AuthMode::Silent => self.acquire_silent(ctx, tenant, scope, false).await,
            AuthMode::DeviceCode => self.acquire_device_code(ctx, tenant, scope).await,
            AuthMode::UsernamePassword => {
                let credentials = credentials.ok_or(AuthError::MissingCredentials(
                    "username and password are required for username/password sign-in",
                ))?;
                self.acquire_username_password(ctx, tenant, scope, credentials).await
            }
            AuthMode::Interactive => {
                let login_hint = credentials.map(|c| c.username.as_str());
                self.acquire_interactive(ctx, tenant, scope, login_hint).await
            }
            AuthMode::ClientSecret => self.acquire_client_secret(ctx, tenant, scope, true).await,
        }
    }

    /// Sign in once per scope so that every later call can run silently
    pub async fn login(
        &self,
        ctx: &CallContext,
        tenant: Option<&str>,
        scopes: &[String],
        mode: AuthMode,
        credentials: Option<&UserCredentials>,
    ) -> Result<Vec<Token>, AuthError> {
        let mut tokens = Vec::with_capacity(scopes.len());
        for scope in scopes {
            info!("Acquiring token for scope {} ({:?})", scope, mode);
            tokens.push(self.acquire(ctx, tenant, scope, mode, credentials).await?);
        }
        Ok(tokens)
    }

    pub async fn acquire_silent(
        &self,
        ctx: &CallContext,
        tenant: Option<&str>,
        scope: &str,
        force_refresh: bool,
    ) -> Result<Token, AuthError> {
        if self.client_secret.is_some() {
            return self.acquire_client_secret(ctx, tenant, scope, force_refresh).await;
        }

        let content = self.cache.load()?;
        let account = content
            .find_account(tenant)
            .ok_or_else(|| AuthError::NoCachedAccount {
                tenant: tenant.unwrap_or(super::authority::ORGANIZATIONS).to_string(),
            })?;

        if !force_refresh {
            if let Some(token) = account.access_tokens.get(scope) {
                if !token.is_expiring(self.refresh_skew) {
                    debug!("Using cached token for {}", scope);
                    return Ok(token.clone());
                }
            }
        }

        let refresh_token = account
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::SilentAuthFailed {
                scope: scope.to_string(),
                message: "no refresh token cached for the account".to_string(),
            })?;

        let identity = account.identity.clone();
        let authority = Authority::new(&self.authority_host, Some(&identity.tenant_id));
        debug!("Refreshing token for {} as {}", scope, identity.preferred_username);

        let response = guarded(ctx, self.identity.refresh(&authority, scope, refresh_token)).await?;
        self.store(scope, response, Some(&identity))
    }

    async fn acquire_device_code(&self, ctx: &CallContext, tenant: Option<&str>, scope: &str) -> Result<Token, AuthError> {
        let authority = self.authority(tenant);
        let device_code = guarded(ctx, self.identity.request_device_code(&authority, scope)).await?;
        (self.device_code_prompt)(&device_code);

        let response = guarded(ctx, self.identity.poll_device_code(&authority, &device_code)).await?;
        self.store(scope, response, None)
    }

    /// Client credentials grant, served from the cache while the token is fresh
    async fn acquire_client_secret(
        &self,
        ctx: &CallContext,
        tenant: Option<&str>,
        scope: &str,
        force_refresh: bool,
    ) -> Result<Token, AuthError> {
        let secret = self.client_secret.as_deref().ok_or(AuthError::MissingCredentials(
            "a client secret is required for service principal sign-in",
        ))?;
        let tenant = tenant.or(self.tenant_id.as_deref()).ok_or(AuthError::MissingCredentials(
            "a tenant id is required for service principal sign-in",
        ))?;
        let identity = AccountIdentity::service_principal(self.identity.client_id(), tenant);

        if !force_refresh {
            let content = self.cache.load()?;
            let cached = content
                .accounts
                .get(&identity.home_account_id)
                .and_then(|account| account.access_tokens.get(scope))
                .filter(|token| !token.is_expiring(self.refresh_skew));
            if let Some(token) = cached {
                debug!("Using cached service principal token for {}", scope);
                return Ok(token.clone());
            }
        }

        let authority = Authority::new(&self.authority_host, Some(tenant));
        let response = guarded(ctx, self.identity.client_credentials(&authority, scope, secret)).await?;
        self.store(scope, response, Some(&identity))
    }

    async fn acquire_username_password(
        &self,
        ctx: &CallContext,
        tenant: Option<&str>,
        scope: &str,
        credentials: &UserCredentials,
    ) -> Result<Token, AuthError> {
        let authority = self.authority(tenant);
        let response = guarded(
            ctx,
            self.identity
                .username_password(&authority, scope, &credentials.username, &credentials.password),
        )
        .await?;
        self.store(scope, response, None)
    }

    async fn acquire_interactive(
        &self,
        ctx: &CallContext,
        tenant: Option<&str>,
        scope: &str,
        login_hint: Option<&str>,
    ) -> Result<Token, AuthError> {
        let authority = self.authority(tenant);
        let listener = RedirectListener::bind().await?;
        let redirect_uri = listener.redirect_uri();
        let authorization = self
            .identity
            .authorize_url(&authority, scope, &redirect_uri, login_hint)?;

        if let Err(e) = interactive::open_browser(&authorization.url) {
            warn!("{}", e);
            eprintln!("Open the following URL in a browser to sign in:\n{}", authorization.url);
        }

        let code = guarded(ctx, listener.accept_code(authorization.state.secret())).await?;
        let response = guarded(
            ctx,
            self.identity
                .exchange_code(&authority, scope, &code, authorization.verifier, &redirect_uri),
        )
        .await?;
        self.store(scope, response, None)
    }

    /// Record a token response in the cache and hand back the new token
    fn store(&self, scope: &str, response: TokenResponse, known: Option<&AccountIdentity>) -> Result<Token, AuthError> {
        let identity = match (response.id_token.as_deref(), known) {
            (Some(id_token), _) => AccountIdentity::from_id_token(id_token)?,
            (None, Some(identity)) => identity.clone(),
            (None, None) => {
                return Err(AuthError::Cache(
                    "token response carried no id token to identify the account".to_string(),
                ));
            }
        };

        let token = Token::new(scope, &identity.tenant_id, response.access_token, response.expires_in);
        self.cache
            .update(|content| content.record(&identity, response.refresh_token, token.clone()))?;

        info!(
            "Acquired token for {} as {} (expires {})",
            scope, identity.preferred_username, token.expires_on
        );
        Ok(token)
    }
}

#[async_trait]
impl TokenSource for TokenProvider {
    async fn token_for_scope(&self, ctx: &CallContext, scope: &str, force_refresh: bool) -> Result<String, AuthError> {
        let token = self
            .acquire_silent(ctx, self.tenant_id.as_deref(), scope, force_refresh)
            .await?;
        Ok(token.access_token)
    }
}

/// Run an identity call under the context's cancellation
async fn guarded<F, T>(ctx: &CallContext, fut: F) -> Result<T, AuthError>
where
    F: std::future::Future<Output = Result<T, AuthError>>,
{
    match ctx.run(fut).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::Cancelled),
    }
}

fn print_device_code(device_code: &DeviceCodeResponse) {
    match &device_code.message {
        Some(message) => eprintln!("{}", message),
        None => eprintln!(
            "To sign in, open {} and enter the code {} to authenticate.",
            device_code.verification_uri, device_code.user_code
        ),
    }
}
