use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::ServiceEndpoints;
use crate::api::constants::{environment_create_endpoint, environment_endpoint};
use crate::api::{
    ApiClient, ApiError, ApiRequest, ApiResult, CallContext, EnvironmentLifecycle, OperationPoller,
    PollLocation,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentCreateDto {
    pub location: String,
    pub properties: EnvironmentCreateProperties,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentCreateProperties {
    pub display_name: String,
    pub environment_sku: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_environment_metadata: Option<LinkedEnvironmentCreateMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedEnvironmentCreateMetadata {
    pub base_language: i64,
    pub domain_name: String,
    pub currency: CurrencyDto,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrencyDto {
    pub code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentDto {
    pub id: String,
    pub name: String,
    pub location: String,
    pub properties: EnvironmentProperties,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentProperties {
    pub display_name: String,
    pub environment_sku: String,
    pub provisioning_state: String,
    pub linked_environment_metadata: Option<LinkedEnvironmentMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkedEnvironmentMetadata {
    pub domain_name: String,
    pub instance_url: String,
    pub unique_name: String,
    pub version: String,
}

impl EnvironmentDto {
    /// Dataverse instance URL, when the environment has a database
    pub fn instance_url(&self) -> Option<&str> {
        self.properties
            .linked_environment_metadata
            .as_ref()
            .map(|m| m.instance_url.as_str())
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
struct EnvironmentDeleteDto<'a> {
    code: &'a str,
    message: &'a str,
}

/// Environment lifecycle through the BAPI admin endpoints
#[derive(Clone)]
pub struct EnvironmentClient {
    api: ApiClient,
    poller: OperationPoller,
    endpoints: ServiceEndpoints,
}

impl EnvironmentClient {
    pub fn new(api: ApiClient, poller: OperationPoller, endpoints: ServiceEndpoints) -> Self {
        Self { api, poller, endpoints }
    }

    pub async fn get(&self, ctx: &CallContext, environment_id: &str) -> ApiResult<EnvironmentDto> {
        let request = ApiRequest::get(environment_endpoint(&self.endpoints.bapi_url, environment_id)).expect(&[200]);
        let (response, environment) = self.api.execute_for::<EnvironmentDto>(ctx, &request).await?;
        environment.ok_or_else(|| ApiError::empty_body(response.status))
    }

    /// Create an environment and wait until provisioning finishes.
    ///
    /// BAPI either answers `202` with a lifecycle operation to poll, or `201`
    /// with the provisioning state inline.
    pub async fn create(&self, ctx: &CallContext, environment: &EnvironmentCreateDto) -> ApiResult<EnvironmentDto> {
        let request = ApiRequest::post(environment_create_endpoint(&self.endpoints.bapi_url))
            .json(environment)?
            .expect(&[201, 202]);
        let response = self.api.execute(ctx, &request).await?;

        let environment_id = if response.status == 202 {
            let operation = self
                .poller
                .wait(ctx, &response, PollLocation::Location, &EnvironmentLifecycle)
                .await?;
            operation
                .result
                .as_ref()
                .and_then(|lifecycle| lifecycle.environment_id())
                .map(str::to_string)
                .ok_or_else(|| ApiError::OperationFailed {
                    poll_url: operation.poll_url.clone(),
                    message: "lifecycle operation finished without an environment link".to_string(),
                })?
        } else {
            let created = response
                .json::<EnvironmentDto>()?
                .ok_or_else(|| ApiError::empty_body(response.status))?;
            if created.properties.provisioning_state != "Succeeded" {
                return Err(ApiError::OperationFailed {
                    poll_url: request.url.clone(),
                    message: format!(
                        "environment creation failed. provisioning state: {}",
                        created.properties.provisioning_state
                    ),
                });
            }
            created.name
        };

        info!("Created environment {}", environment_id);
        self.get(ctx, &environment_id).await
    }

    /// Delete an environment; one that no longer exists counts as deleted
    pub async fn delete(&self, ctx: &CallContext, environment_id: &str) -> ApiResult<()> {
        let body = EnvironmentDeleteDto {
            code: "7",
            message: "Deleted using powerplatform-cli",
        };
        let request = ApiRequest::delete(environment_endpoint(&self.endpoints.bapi_url, environment_id))
            .json(&body)?
            .expect(&[202, 204, 404]);
        let response = self.api.execute(ctx, &request).await?;

        match response.status {
            404 => {
                info!("Environment {} not found, treating as deleted", environment_id);
                Ok(())
            }
            202 => {
                debug!("Waiting for deletion of environment {}", environment_id);
                self.poller
                    .wait(ctx, &response, PollLocation::Location, &EnvironmentLifecycle)
                    .await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
