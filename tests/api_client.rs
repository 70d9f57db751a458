//! Executor behaviour against a mock HTTP server

mod common;

use std::time::Duration;

use common::{TEST_SCOPE, test_client};
use powerplatform_cli::api::{ApiClient, ApiError, ApiRequest, CallContext, ScopeResolver};
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_expected_status_returns_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/data/v9.2/WhoAmI"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"UserId": "u1"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, tokens) = test_client();
    let request = ApiRequest::get(format!("{}/api/data/v9.2/WhoAmI", server.uri())).expect(&[200]);
    let (response, body) = client
        .execute_for::<Value>(&CallContext::new(), &request)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(body.unwrap()["UserId"], "u1");
    assert_eq!(tokens.calls(), 1);
    assert_eq!(tokens.refreshes(), 0);
}

#[tokio::test]
async fn test_single_401_refreshes_once_and_replays() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/items"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let (client, tokens) = test_client();
    let request = ApiRequest::post(format!("{}/items", server.uri()))
        .json(&json!({"name": "contoso"}))
        .unwrap()
        .expect(&[201]);
    let response = client.execute(&CallContext::new(), &request).await.unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(tokens.refreshes(), 1);

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].body, received[1].body);
    assert_eq!(received[0].headers.get("authorization").unwrap(), "Bearer token-0");
}

#[tokio::test]
async fn test_repeated_401_is_unauthorized_after_one_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secure"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token rejected"))
        .expect(2)
        .mount(&server)
        .await;

    let (client, tokens) = test_client();
    let request = ApiRequest::get(format!("{}/secure", server.uri())).expect(&[200]);
    let err = client.execute(&CallContext::new(), &request).await.unwrap_err();

    assert!(matches!(err, ApiError::Unauthorized { .. }), "got {:?}", err);
    assert!(err.to_string().contains("token rejected"));
    assert_eq!(tokens.refreshes(), 1);
}

#[tokio::test]
async fn test_no_auth_replay_surfaces_first_401() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let (client, tokens) = test_client();
    let request = ApiRequest::post(format!("{}/once", server.uri()))
        .text_body("{\"idempotencyKey\":\"k1\"}")
        .no_auth_replay();
    let err = client.execute(&CallContext::new(), &request).await.unwrap_err();

    assert!(matches!(err, ApiError::Unauthorized { .. }));
    assert_eq!(tokens.refreshes(), 0);
}

#[tokio::test]
async fn test_caller_authorization_header_is_not_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer caller-token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("caller token rejected"))
        .expect(1)
        .mount(&server)
        .await;

    let (client, tokens) = test_client();
    let request = ApiRequest::get(format!("{}/own-auth", server.uri())).header("Authorization", "Bearer caller-token");
    let err = client.execute(&CallContext::new(), &request).await.unwrap_err();

    assert!(matches!(err, ApiError::Unauthorized { .. }));
    assert_eq!(tokens.refreshes(), 0);
}

#[tokio::test]
async fn test_unexpected_status_reports_actual_and_expected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "not found"})))
        .mount(&server)
        .await;

    let (client, _) = test_client();
    let request = ApiRequest::get(format!("{}/missing", server.uri())).expect(&[200]);
    let err = client.execute(&CallContext::new(), &request).await.unwrap_err();

    match &err {
        ApiError::UnexpectedHttpReturnCode {
            actual,
            expected,
            body_excerpt,
        } => {
            assert_eq!(*actual, 404);
            assert_eq!(expected, &vec![200]);
            assert!(body_excerpt.contains("not found"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    let message = err.to_string();
    assert!(message.contains("404"));
    assert!(message.contains("200"));
}

#[tokio::test]
async fn test_empty_expected_set_accepts_any_success() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let (client, _) = test_client();
    let request = ApiRequest::delete(format!("{}/thing", server.uri()));
    let response = client.execute(&CallContext::new(), &request).await.unwrap();
    assert_eq!(response.status, 204);
}

#[tokio::test]
async fn test_malformed_body_is_distinct_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let (client, _) = test_client();
    let request = ApiRequest::get(format!("{}/json", server.uri())).expect(&[200]);
    let err = client
        .execute_for::<Value>(&CallContext::new(), &request)
        .await
        .unwrap_err();

    match err {
        ApiError::MalformedResponseBody { status, body_excerpt, .. } => {
            assert_eq!(status, 200);
            assert!(body_excerpt.contains("gateway"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_transport_error_is_not_retried() {
    let (client, tokens) = test_client();
    // Nothing listens on the discard port
    let request = ApiRequest::get("http://127.0.0.1:9/unreachable");
    let err = client.execute(&CallContext::new(), &request).await.unwrap_err();

    assert!(matches!(err, ApiError::Transport { .. }), "got {:?}", err);
    assert_eq!(tokens.calls(), 1);
}

#[tokio::test]
async fn test_unknown_host_fails_before_token_acquisition() {
    let (client, tokens) = test_client();
    let request = ApiRequest::get("https://unknown.example.com/api");
    let err = client.execute(&CallContext::new(), &request).await.unwrap_err();

    assert!(matches!(err, ApiError::UnknownHost { ref host } if host == "unknown.example.com"));
    assert_eq!(tokens.calls(), 0);
}

#[tokio::test]
async fn test_relative_url_is_rejected() {
    let (client, tokens) = test_client();
    let request = ApiRequest::get("/api/data/v9.2/WhoAmI");
    let err = client.execute(&CallContext::new(), &request).await.unwrap_err();

    assert!(matches!(err, ApiError::UrlFormat { .. }));
    assert_eq!(tokens.calls(), 0);
}

#[tokio::test]
async fn test_request_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (client, _) = test_client();
    let client = client.with_partner_id(Some("00000000-0000-0000-0000-0000000000aa".to_string()));
    let ctx = CallContext::new().for_object("powerplatform_environment", "resource");
    client
        .execute(&ctx, &ApiRequest::get(format!("{}/headers", server.uri())))
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    let headers = &received[0].headers;
    assert_eq!(headers.get("authorization").unwrap(), "Bearer token-0");
    assert_eq!(headers.get("content-type").unwrap(), "application/json");

    let user_agent = headers.get("user-agent").unwrap().to_str().unwrap();
    assert!(user_agent.starts_with("powerplatform-cli/"));
    assert!(user_agent.contains("pid-00000000-0000-0000-0000-0000000000aa"));
    assert!(user_agent.ends_with("powerplatform_environment resource"));

    let request_id = headers.get("request-id").unwrap().to_str().unwrap();
    assert!(request_id.starts_with(&format!("|{}.", ctx.request_id())));
    assert_eq!(
        headers.get("correlation-context").unwrap(),
        "objectName=powerplatform_environment,requestType=resource"
    );
}

#[tokio::test]
async fn test_telemetry_optout_drops_correlation_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (client, _) = test_client();
    let client = client.with_telemetry_optout(true);
    let ctx = CallContext::new().for_object("powerplatform_solution", "resource");
    client
        .execute(&ctx, &ApiRequest::get(format!("{}/quiet", server.uri())))
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    let headers = &received[0].headers;
    assert!(headers.get("request-id").is_none());
    assert!(headers.get("correlation-context").is_none());
    assert!(headers.get("authorization").is_some());
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let (client, _) = test_client();
    let ctx = CallContext::new();
    let token = ctx.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let started = std::time::Instant::now();
    let err = client
        .execute(&ctx, &ApiRequest::get(format!("{}/slow", server.uri())))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_dataverse_host_scope_reaches_token_source() {
    use async_trait::async_trait;
    use powerplatform_cli::auth::{AuthError, TokenSource};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSource(Mutex<Vec<(String, String)>>);

    #[async_trait]
    impl TokenSource for RecordingSource {
        async fn token_for_scope(&self, ctx: &CallContext, scope: &str, _force_refresh: bool) -> Result<String, AuthError> {
            self.0.lock().unwrap().push((scope.to_string(), ctx.request_id().to_string()));
            Ok("t".to_string())
        }
    }

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let source = Arc::new(RecordingSource::default());
    let scopes = ScopeResolver::new().with_host("127.0.0.1", TEST_SCOPE);
    let client = ApiClient::new(reqwest::Client::new(), source.clone(), scopes);
    let ctx = CallContext::new();
    client
        .execute(&ctx, &ApiRequest::get(format!("{}/x", server.uri())))
        .await
        .unwrap();

    assert_eq!(
        source.0.lock().unwrap().as_slice(),
        [(TEST_SCOPE.to_string(), ctx.request_id().to_string())]
    );
}
