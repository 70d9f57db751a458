#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use powerplatform_cli::api::{ApiClient, CallContext, OperationPoller, PollConfig, ScopeResolver};
use powerplatform_cli::auth::{AuthError, TokenSource};

pub const TEST_SCOPE: &str = "https://test.crm.dynamics.com/.default";

/// Token source handing out `token-<n>`, where `n` counts forced refreshes
#[derive(Default)]
pub struct CountingTokenSource {
    calls: AtomicUsize,
    refreshes: AtomicUsize,
}

impl CountingTokenSource {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for CountingTokenSource {
    async fn token_for_scope(&self, _ctx: &CallContext, _scope: &str, force_refresh: bool) -> Result<String, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let generation = if force_refresh {
            self.refreshes.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.refreshes.load(Ordering::SeqCst)
        };
        Ok(format!("token-{}", generation))
    }
}

/// Scope table that knows the loopback host of a mock server
pub fn loopback_scopes() -> ScopeResolver {
    ScopeResolver::new().with_host("127.0.0.1", TEST_SCOPE)
}

pub fn test_client() -> (ApiClient, Arc<CountingTokenSource>) {
    let tokens = Arc::new(CountingTokenSource::default());
    let client = ApiClient::new(reqwest::Client::new(), tokens.clone(), loopback_scopes());
    (client, tokens)
}

pub fn fast_poller(client: &ApiClient, timeout: Duration) -> OperationPoller {
    OperationPoller::new(
        client.clone(),
        PollConfig {
            interval: Duration::from_millis(20),
            timeout,
        },
    )
}

/// Unsigned id token carrying the claims the token provider reads
pub fn id_token(oid: &str, tenant: &str, username: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let claims = serde_json::json!({
        "oid": oid,
        "tid": tenant,
        "preferred_username": username,
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}
