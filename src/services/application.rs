use log::info;
use serde::Deserialize;

use super::ServiceEndpoints;
use crate::api::constants::application_install_endpoint;
use crate::api::{
    ApiClient, ApiError, ApiRequest, ApiResult, ApplicationInstallStatus, CallContext, OperationPoller,
    PollLocation,
};

/// Synchronous `201 Created` install answer
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ApplicationCreatedDto {
    name: String,
    properties: ApplicationCreatedProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApplicationCreatedProperties {
    provisioning_state: String,
}

/// Identifier of a completed application install
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationInstall {
    /// Finished through an install operation
    Operation(String),
    /// Provisioned synchronously
    Created(String),
}

impl ApplicationInstall {
    pub fn id(&self) -> &str {
        match self {
            ApplicationInstall::Operation(id) | ApplicationInstall::Created(id) => id,
        }
    }
}

#[derive(Clone)]
pub struct ApplicationClient {
    api: ApiClient,
    poller: OperationPoller,
    endpoints: ServiceEndpoints,
}

impl ApplicationClient {
    pub fn new(api: ApiClient, poller: OperationPoller, endpoints: ServiceEndpoints) -> Self {
        Self { api, poller, endpoints }
    }

    /// Install the application package `unique_name` into an environment
    pub async fn install(
        &self,
        ctx: &CallContext,
        environment_id: &str,
        unique_name: &str,
    ) -> ApiResult<ApplicationInstall> {
        let url = application_install_endpoint(&self.endpoints.powerplatform_url, environment_id, unique_name);
        let request = ApiRequest::post(url).text_body("{}").expect(&[201, 202]);
        let response = self.api.execute(ctx, &request).await?;

        if response.status == 202 {
            let operation = self
                .poller
                .wait(ctx, &response, PollLocation::OperationLocation, &ApplicationInstallStatus)
                .await?;
            let operation_id = operation
                .result
                .map(|lifecycle| lifecycle.operation_id)
                .filter(|id| !id.is_empty())
                .unwrap_or(operation.poll_url);
            info!("Installed {} into environment {}", unique_name, environment_id);
            return Ok(ApplicationInstall::Operation(operation_id));
        }

        let created = response
            .json::<ApplicationCreatedDto>()?
            .ok_or_else(|| ApiError::empty_body(response.status))?;
        if created.properties.provisioning_state != "Succeeded" {
            return Err(ApiError::OperationFailed {
                poll_url: request.url,
                message: format!(
                    "application installation failed. provisioning state: {}",
                    created.properties.provisioning_state
                ),
            });
        }
        info!("Installed {} into environment {}", unique_name, environment_id);
        Ok(ApplicationInstall::Created(created.name))
    }
}
