//! Many in-flight calls sharing one client manager and token cache

mod common;

use std::sync::Arc;

use common::{TEST_SCOPE, loopback_scopes};
use powerplatform_cli::api::{ApiRequest, CallContext, TEST_MODE_TOKEN};
use powerplatform_cli::auth::{
    AccountIdentity, CacheContent, IdentityClient, MemoryCachePersistence, Token, TokenCache, TokenProvider,
};
use powerplatform_cli::services::ServiceEndpoints;
use powerplatform_cli::{ClientManager, ProviderConfig};
use serde_json::json;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn seeded_cache(access_token: Option<&str>) -> CacheContent {
    let identity = AccountIdentity {
        tenant_id: "tenant-1".into(),
        preferred_username: "admin@contoso.com".into(),
        home_account_id: "oid-1.tenant-1".into(),
    };
    let token = match access_token {
        Some(access_token) => Token::new(TEST_SCOPE, "tenant-1", access_token, 3600),
        None => Token::new("https://other/.default", "tenant-1", "unused", 3600),
    };
    let mut content = CacheContent::default();
    content.record(&identity, Some("rt-1".to_string()), token);
    content
}

fn manager(server: &MockServer, persistence: Arc<MemoryCachePersistence>) -> ClientManager {
    let provider = TokenProvider::new(
        Arc::new(TokenCache::new(persistence)),
        IdentityClient::new(reqwest::Client::new(), "test-client"),
        server.uri(),
    )
    .with_tenant(Some("tenant-1".to_string()));

    ClientManager::with_token_provider(
        ProviderConfig::default(),
        Arc::new(provider),
        loopback_scopes(),
        ServiceEndpoints::single(server.uri()),
    )
    .unwrap()
}

async fn mount_token_endpoint(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "refresh_token": "rt-1",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_concurrent_requests_share_cache_without_corruption() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "at-shared").await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/data/v9\.2/accounts\(\d+\)$"))
        .and(header("authorization", "Bearer at-shared"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Contoso"})))
        .expect(10)
        .mount(&server)
        .await;

    let persistence = Arc::new(MemoryCachePersistence::with_content(&seeded_cache(None)).unwrap());
    let manager = Arc::new(manager(&server, persistence.clone()));

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let manager = manager.clone();
            let url = format!("{}/api/data/v9.2/accounts({})", server.uri(), i);
            tokio::spawn(async move {
                manager
                    .api()
                    .execute(&CallContext::new(), &ApiRequest::get(url).expect(&[200]))
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap().status, 200);
    }

    assert!(persistence.export_count() >= 1);
    let content = persistence.content().unwrap();
    let account = content.find_account(Some("tenant-1")).unwrap();
    assert_eq!(account.access_tokens.get(TEST_SCOPE).unwrap().access_token, "at-shared");
    assert!(account.access_tokens.contains_key("https://other/.default"));
}

#[tokio::test]
async fn test_rejected_cached_token_forces_refresh_through_provider() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "at-fresh").await;
    Mock::given(method("GET"))
        .and(path("/api/data/v9.2/WhoAmI"))
        .and(header("authorization", "Bearer at-stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/data/v9.2/WhoAmI"))
        .and(header("authorization", "Bearer at-fresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let persistence = Arc::new(MemoryCachePersistence::with_content(&seeded_cache(Some("at-stale"))).unwrap());
    let manager = manager(&server, persistence.clone());

    let response = manager
        .api()
        .execute(
            &CallContext::new(),
            &ApiRequest::get(format!("{}/api/data/v9.2/WhoAmI", server.uri())).expect(&[200]),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    let content = persistence.content().unwrap();
    let account = content.find_account(Some("tenant-1")).unwrap();
    assert_eq!(account.access_tokens.get(TEST_SCOPE).unwrap().access_token, "at-fresh");
}

#[tokio::test]
async fn test_test_mode_sends_static_token_without_identity_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", format!("Bearer {}", TEST_MODE_TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = ProviderConfig {
        use_test_mode: true,
        ..Default::default()
    };
    let manager = ClientManager::with_parts(
        config,
        Arc::new(MemoryCachePersistence::new()),
        loopback_scopes(),
        ServiceEndpoints::single(server.uri()),
    )
    .unwrap();

    manager
        .api()
        .execute(&CallContext::new(), &ApiRequest::get(format!("{}/anything", server.uri())))
        .await
        .unwrap();
}
