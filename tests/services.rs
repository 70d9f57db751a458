//! Environment, application and licensing clients against a mock server

mod common;

use std::time::Duration;

use common::{fast_poller, test_client};
use powerplatform_cli::api::{ApiError, CallContext};
use powerplatform_cli::services::environment::EnvironmentCreateProperties;
use powerplatform_cli::services::{
    ApplicationClient, ApplicationInstall, EnvironmentClient, EnvironmentCreateDto, LicensingClient,
    ServiceEndpoints,
};
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENVIRONMENTS: &str = "/providers/Microsoft.BusinessAppPlatform/environments";
const ADMIN_ENVIRONMENT: &str = "/providers/Microsoft.BusinessAppPlatform/scopes/admin/environments/env-1";

fn environments(server: &MockServer) -> EnvironmentClient {
    let (client, _) = test_client();
    let poller = fast_poller(&client, Duration::from_secs(10));
    EnvironmentClient::new(client, poller, ServiceEndpoints::single(server.uri()))
}

fn sandbox() -> EnvironmentCreateDto {
    EnvironmentCreateDto {
        location: "europe".into(),
        properties: EnvironmentCreateProperties {
            display_name: "Contoso Sandbox".into(),
            environment_sku: "Sandbox".into(),
            ..Default::default()
        },
    }
}

fn environment_record(state: &str) -> serde_json::Value {
    json!({
        "id": ADMIN_ENVIRONMENT,
        "name": "env-1",
        "location": "europe",
        "properties": {
            "displayName": "Contoso Sandbox",
            "environmentSku": "Sandbox",
            "provisioningState": state,
            "linkedEnvironmentMetadata": {"instanceUrl": "https://contoso.crm4.dynamics.com/"}
        }
    })
}

#[tokio::test]
async fn test_environment_create_follows_lifecycle_then_reads_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENVIRONMENTS))
        .and(query_param("api-version", "2023-06-01"))
        .respond_with(
            ResponseTemplate::new(202).insert_header("Location", format!("{}/lifecycleOperations/lc-1", server.uri())),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/lifecycleOperations/lc-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "lc-1",
            "state": {"id": "Succeeded"},
            "links": {"environment": {"path": ENVIRONMENTS.to_string() + "/env-1"}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ADMIN_ENVIRONMENT))
        .respond_with(ResponseTemplate::new(200).set_body_json(environment_record("Succeeded")))
        .expect(1)
        .mount(&server)
        .await;

    let created = environments(&server)
        .create(&CallContext::new(), &sandbox())
        .await
        .unwrap();

    assert_eq!(created.name, "env-1");
    assert_eq!(created.instance_url(), Some("https://contoso.crm4.dynamics.com/"));
}

#[tokio::test]
async fn test_environment_create_synchronous_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENVIRONMENTS))
        .respond_with(ResponseTemplate::new(201).set_body_json(environment_record("Failed")))
        .mount(&server)
        .await;

    let err = environments(&server)
        .create(&CallContext::new(), &sandbox())
        .await
        .unwrap_err();

    match err {
        ApiError::OperationFailed { message, .. } => assert!(message.contains("Failed")),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_environment_delete_of_missing_environment_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(ADMIN_ENVIRONMENT))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    environments(&server)
        .delete(&CallContext::new(), "env-1")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_environment_delete_waits_for_lifecycle() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(ADMIN_ENVIRONMENT))
        .respond_with(
            ResponseTemplate::new(202).insert_header("Location", format!("{}/lifecycleOperations/lc-2", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/lifecycleOperations/lc-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": {"id": "Running"}})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/lifecycleOperations/lc-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": {"id": "Succeeded"}})))
        .mount(&server)
        .await;

    environments(&server)
        .delete(&CallContext::new(), "env-1")
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    let delete = received.iter().find(|r| r.method.as_str() == "DELETE").unwrap();
    let body: serde_json::Value = serde_json::from_slice(&delete.body).unwrap();
    assert_eq!(body["code"], "7");
    assert_eq!(received.len(), 3);
}

fn applications(server: &MockServer) -> ApplicationClient {
    let (client, _) = test_client();
    let poller = fast_poller(&client, Duration::from_secs(10));
    ApplicationClient::new(client, poller, ServiceEndpoints::single(server.uri()))
}

const INSTALL: &str = "/appmanagement/environments/env-1/applicationPackages/msdyn_Contoso/install";

#[tokio::test]
async fn test_application_install_polls_operation_location() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INSTALL))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("Operation-Location", format!("{}/appmanagement/operations/install-1", server.uri())),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/appmanagement/operations/install-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"operationId": "install-1", "status": "Running"})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/appmanagement/operations/install-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"operationId": "install-1", "status": "Succeeded"})))
        .mount(&server)
        .await;

    let installed = applications(&server)
        .install(&CallContext::new(), "env-1", "msdyn_Contoso")
        .await
        .unwrap();

    assert_eq!(installed, ApplicationInstall::Operation("install-1".to_string()));
}

#[tokio::test]
async fn test_application_install_failure_carries_error_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INSTALL))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("Operation-Location", format!("{}/appmanagement/operations/install-2", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/appmanagement/operations/install-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "operationId": "install-2",
            "status": "Failed",
            "error": {"message": "Package requires a Dataverse database"}
        })))
        .mount(&server)
        .await;

    let err = applications(&server)
        .install(&CallContext::new(), "env-1", "msdyn_Contoso")
        .await
        .unwrap_err();

    match err {
        ApiError::OperationFailed { message, .. } => {
            assert!(message.contains("Package requires a Dataverse database"))
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_application_install_created_synchronously() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INSTALL))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "name": "app-1",
            "properties": {"provisioningState": "Succeeded"}
        })))
        .mount(&server)
        .await;

    let installed = applications(&server)
        .install(&CallContext::new(), "env-1", "msdyn_Contoso")
        .await
        .unwrap();

    assert_eq!(installed.id(), "app-1");
    assert!(matches!(installed, ApplicationInstall::Created(_)));
}

fn licensing(server: &MockServer) -> LicensingClient {
    let (client, _) = test_client();
    let poller = fast_poller(&client, Duration::from_secs(10));
    LicensingClient::new(client, poller, ServiceEndpoints::single(server.uri()))
}

fn policy(status: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "bp-1",
        "name": "Contoso pay-as-you-go",
        "status": status,
        "location": "europe"
    }))
}

#[tokio::test]
async fn test_empty_environment_list_is_a_no_op() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let result = licensing(&server)
        .add_environments(&CallContext::new(), "bp-1", &[])
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_add_environments_waits_for_policy_to_settle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/licensing/billingPolicies/bp-1/environments/add"))
        .and(body_json(json!({"environmentIds": ["env-1", "env-2"]})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/licensing/billingPolicies/bp-1"))
        .respond_with(policy("Provisioning"))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/licensing/billingPolicies/bp-1"))
        .respond_with(policy("Enabled"))
        .mount(&server)
        .await;

    let settled = licensing(&server)
        .add_environments(&CallContext::new(), "bp-1", &["env-1".to_string(), "env-2".to_string()])
        .await
        .unwrap()
        .unwrap();

    assert_eq!(settled.status, "Enabled");
    let gets = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "GET")
        .count();
    assert_eq!(gets, 3);
}

#[tokio::test]
async fn test_remove_environments_on_settled_policy_skips_polling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/licensing/billingPolicies/bp-1/environments/remove"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/licensing/billingPolicies/bp-1"))
        .respond_with(policy("Disabled"))
        .expect(1)
        .mount(&server)
        .await;

    let settled = licensing(&server)
        .remove_environments(&CallContext::new(), "bp-1", &["env-1".to_string()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.status, "Disabled");
}
