use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;

use super::constants::headers;
use super::context::CallContext;
use super::error::{ApiError, ApiResult};
use super::logging::ApiLogger;
use super::request::ApiRequest;
use super::response::ApiResponse;
use super::scope::ScopeResolver;
use crate::auth::TokenSource;

/// Shared HTTP client with connection pooling
pub fn build_http_client(request_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(request_timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(base_user_agent())
        .build()
}

fn base_user_agent() -> String {
    format!(
        "{}/{} ({}; {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Authenticated executor shared by every API family. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    http_client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    scopes: Arc<ScopeResolver>,
    logger: ApiLogger,
    telemetry_optout: bool,
    partner_id: Option<String>,
}

impl ApiClient {
    pub fn new(http_client: reqwest::Client, tokens: Arc<dyn TokenSource>, scopes: ScopeResolver) -> Self {
        Self {
            http_client,
            tokens,
            scopes: Arc::new(scopes),
            logger: ApiLogger::new(),
            telemetry_optout: false,
            partner_id: None,
        }
    }

    /// Skip the user agent and correlation headers
    pub fn with_telemetry_optout(mut self, optout: bool) -> Self {
        self.telemetry_optout = optout;
        self
    }

    pub fn with_partner_id(mut self, partner_id: Option<String>) -> Self {
        self.partner_id = partner_id.filter(|id| !id.is_empty());
        self
    }

    pub fn with_logger(mut self, logger: ApiLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn http_client(&self) -> reqwest::Client {
        self.http_client.clone()
    }

    pub fn scopes(&self) -> &ScopeResolver {
        &self.scopes
    }

    pub fn logger(&self) -> &ApiLogger {
        &self.logger
    }

    /// Send `request` with a bearer token for its host and validate the status.
    ///
    /// A `401` triggers exactly one forced token refresh and one resend of the
    /// same request, unless the caller supplied its own `Authorization` header.
    /// Transport failures are returned as-is.
    pub async fn execute(&self, ctx: &CallContext, request: &ApiRequest) -> ApiResult<ApiResponse> {
        let url = parse_absolute_url(&request.url)?;
        let scope = self.scopes.resolve_url(&url)?;
        let replay = request.replay_on_unauthorized && !request.has_header(reqwest::header::AUTHORIZATION.as_str());

        let mut force_refresh = false;
        let mut attempt = 1;
        loop {
            let token = ctx
                .run(self.tokens.token_for_scope(ctx, &scope, force_refresh))
                .await??;
            let response = self.send(ctx, request, &url, &token, attempt).await?;

            if response.status == 401 {
                if !force_refresh && replay {
                    self.logger.log_token_refresh(ctx, url.as_str(), &scope);
                    force_refresh = true;
                    attempt += 1;
                    continue;
                }
                return Err(ApiError::Unauthorized {
                    url: url.to_string(),
                    body_excerpt: response.body_excerpt(),
                });
            }

            if !request.expects(response.status) {
                return Err(ApiError::UnexpectedHttpReturnCode {
                    actual: response.status,
                    expected: request.expected_status_codes.clone(),
                    body_excerpt: response.body_excerpt(),
                });
            }

            return Ok(response);
        }
    }

    /// [`execute`](Self::execute) and decode the JSON body, if any
    pub async fn execute_for<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        request: &ApiRequest,
    ) -> ApiResult<(ApiResponse, Option<T>)> {
        let response = self.execute(ctx, request).await?;
        let decoded = response.json()?;
        Ok((response, decoded))
    }

    async fn send(
        &self,
        ctx: &CallContext,
        request: &ApiRequest,
        url: &Url,
        token: &str,
        attempt: u32,
    ) -> ApiResult<ApiResponse> {
        let trace = self
            .logger
            .start_request(ctx, request.method.as_str(), url.as_str(), attempt);

        let mut outgoing = request.headers.clone();
        if !request.has_header(reqwest::header::CONTENT_TYPE.as_str()) {
            outgoing.push((
                reqwest::header::CONTENT_TYPE.to_string(),
                headers::CONTENT_TYPE_JSON.to_string(),
            ));
        }
        if !request.has_header(reqwest::header::AUTHORIZATION.as_str()) {
            outgoing.push((
                reqwest::header::AUTHORIZATION.to_string(),
                format!("Bearer {}", token),
            ));
        }
        if !self.telemetry_optout {
            if !request.has_header(reqwest::header::USER_AGENT.as_str()) {
                outgoing.push((reqwest::header::USER_AGENT.to_string(), self.user_agent(ctx)));
            }
            for (name, value) in ctx.correlation_headers() {
                outgoing.push((name.to_string(), value));
            }
        }

        let mut builder = self.http_client.request(request.method.clone(), url.clone());
        for (name, value) in &outgoing {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        self.logger.log_request(&trace, &outgoing);

        let transport_error = |source: reqwest::Error| ApiError::Transport {
            method: request.method.to_string(),
            url: url.to_string(),
            source,
        };

        let response = match ctx.run(builder.send()).await? {
            Ok(response) => response,
            Err(e) => {
                self.logger.log_transport_error(&trace, &e);
                return Err(transport_error(e));
            }
        };

        let status = response.status().as_u16();
        let response_headers = response.headers().clone();
        let body = ctx.run(response.bytes()).await?.map_err(transport_error)?;

        let response = ApiResponse {
            status,
            headers: response_headers,
            body: body.to_vec(),
        };
        self.logger
            .log_response(&trace, status, &response.headers, &response.body_excerpt());
        Ok(response)
    }

    fn user_agent(&self, ctx: &CallContext) -> String {
        let mut user_agent = base_user_agent();
        if let Some(partner_id) = &self.partner_id {
            user_agent.push_str(&format!(" pid-{}", partner_id));
        }
        if let Some((object_name, request_type)) = ctx.object() {
            user_agent.push_str(&format!(" {} {}", object_name, request_type));
        }
        user_agent
    }
}

fn parse_absolute_url(raw: &str) -> ApiResult<Url> {
    let url = Url::parse(raw).map_err(|e| ApiError::UrlFormat {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(ApiError::UrlFormat {
            url: raw.to_string(),
            reason: "URL must be absolute with a host".to_string(),
        });
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_urls_are_rejected() {
        assert!(matches!(
            parse_absolute_url("/api/data/v9.2/WhoAmI"),
            Err(ApiError::UrlFormat { .. })
        ));
        assert!(matches!(
            parse_absolute_url("mailto:admin@contoso.com"),
            Err(ApiError::UrlFormat { .. })
        ));
        assert!(parse_absolute_url("https://api.bap.microsoft.com/providers").is_ok());
    }

    #[test]
    fn test_base_user_agent() {
        let user_agent = base_user_agent();
        assert!(user_agent.starts_with("powerplatform-cli/"));
        assert!(user_agent.contains(std::env::consts::OS));
    }
}
