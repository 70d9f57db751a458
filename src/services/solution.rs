//! Dataverse solution import: stage, import asynchronously, poll, verify

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::constants::{
    async_operation_endpoint, import_solution_async_endpoint, solution_import_result_endpoint,
    stage_solution_endpoint,
};
use crate::api::{
    ApiClient, ApiError, ApiRequest, ApiResult, AsyncOperationDto, AsyncOperationStatus, CallContext,
    OperationPoller,
};

const CONNECTION_REFERENCE_TYPE: &str = "Microsoft.Dynamics.CRM.connectionreference";
const ENVIRONMENT_VARIABLE_TYPE: &str = "Microsoft.Dynamics.CRM.environmentvariablevalue";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StageSolutionRequest {
    customization_file: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StageSolutionResponse {
    pub stage_solution_results: StageSolutionResults,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StageSolutionResults {
    pub stage_solution_upload_id: String,
    pub stage_solution_status: String,
    pub solution_validation_results: Vec<SolutionValidationResult>,
    pub missing_dependencies: Vec<MissingDependency>,
    pub solution_details: SolutionDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SolutionValidationResult {
    pub solution_validation_result_type: String,
    pub error_code: i64,
    pub additional_info: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MissingDependency {
    pub required_component_schema_name: String,
    pub required_component_display_name: String,
    pub required_solution_name: String,
    pub dependent_component_schema_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SolutionDetails {
    pub solution_unique_name: String,
    pub solution_friendly_name: String,
    pub is_managed: bool,
    pub solution_version: String,
}

impl StageSolutionResults {
    /// Error listing every missing dependency and validation message, `None` when staging passed
    fn failure(&self) -> Option<String> {
        if self.stage_solution_status == "Passed" {
            return None;
        }
        let mut lines = vec![format!("solution failed with status: '{}'", self.stage_solution_status)];
        lines.extend(
            self.missing_dependencies
                .iter()
                .map(|d| format!("missing dependency: '{}'", d.required_component_schema_name)),
        );
        lines.extend(
            self.solution_validation_results
                .iter()
                .map(|v| format!("solution validation failed: {}", v.message)),
        );
        Some(lines.join("\n"))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ImportSolutionRequest {
    publish_workflows: bool,
    overwrite_unmanaged_customizations: bool,
    component_parameters: Vec<Value>,
    solution_parameters: SolutionParameters,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SolutionParameters {
    stage_solution_upload_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ImportSolutionResponse {
    pub import_job_key: String,
    pub async_operation_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SolutionImportResult {
    pub solution_operation_result: SolutionOperationResult,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SolutionOperationResult {
    pub status: String,
    pub warning_messages: Vec<Value>,
    pub error_messages: Vec<Value>,
}

/// Deployment settings applied as component parameters during import
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SolutionSettings {
    #[serde(rename = "environmentvariables")]
    pub environment_variables: Vec<EnvironmentVariableSetting>,
    #[serde(rename = "connectionreferences")]
    pub connection_references: Vec<ConnectionReferenceSetting>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnvironmentVariableSetting {
    #[serde(rename = "schemaname")]
    pub schema_name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectionReferenceSetting {
    #[serde(rename = "logicalname")]
    pub logical_name: String,
    #[serde(rename = "connectionid")]
    pub connection_id: String,
    #[serde(rename = "connectorid")]
    pub connector_id: String,
}

impl SolutionSettings {
    fn component_parameters(&self) -> Vec<Value> {
        let references = self.connection_references.iter().map(|reference| {
            serde_json::json!({
                "@odata.type": CONNECTION_REFERENCE_TYPE,
                "connectionreferencelogicalname": reference.logical_name,
                "connectionreferencedisplayname": "",
                "description": "",
                "connectorid": reference.connector_id,
                "connectionid": reference.connection_id,
            })
        });
        let variables = self
            .environment_variables
            .iter()
            .filter(|variable| !variable.value.is_empty())
            .map(|variable| {
                serde_json::json!({
                    "@odata.type": ENVIRONMENT_VARIABLE_TYPE,
                    "schemaname": variable.schema_name,
                    "value": variable.value,
                })
            });
        references.chain(variables).collect()
    }
}

/// Outcome of a finished import
#[derive(Debug, Clone)]
pub struct SolutionImport {
    pub solution: SolutionDetails,
    pub import_job_key: String,
    pub async_operation: AsyncOperationDto,
    pub polls: u32,
}

#[derive(Clone)]
pub struct SolutionClient {
    api: ApiClient,
    poller: OperationPoller,
}

impl SolutionClient {
    pub fn new(api: ApiClient, poller: OperationPoller) -> Self {
        Self { api, poller }
    }

    /// Import a solution zip into the Dataverse environment at `environment_url`
    pub async fn import(
        &self,
        ctx: &CallContext,
        environment_url: &str,
        content: &[u8],
        settings: Option<&SolutionSettings>,
    ) -> ApiResult<SolutionImport> {
        let staged = self.stage(ctx, environment_url, content).await?;
        debug!(
            "Staged solution {} ({})",
            staged.solution_details.solution_unique_name, staged.stage_solution_upload_id
        );

        let import_request = ImportSolutionRequest {
            publish_workflows: true,
            overwrite_unmanaged_customizations: false,
            component_parameters: settings.map(SolutionSettings::component_parameters).unwrap_or_default(),
            solution_parameters: SolutionParameters {
                stage_solution_upload_id: staged.stage_solution_upload_id.clone(),
            },
        };
        let request = ApiRequest::post(import_solution_async_endpoint(environment_url))
            .json(&import_request)?
            .expect(&[200]);
        let (response, started) = self.api.execute_for::<ImportSolutionResponse>(ctx, &request).await?;
        let started = started.ok_or_else(|| ApiError::empty_body(response.status))?;

        let operation = self
            .poller
            .wait_at(
                ctx,
                async_operation_endpoint(environment_url, &started.async_operation_id),
                &AsyncOperationStatus,
            )
            .await?;

        self.verify_import(ctx, environment_url, &started.import_job_key).await?;
        info!(
            "Imported solution {} after {} polls",
            staged.solution_details.solution_unique_name, operation.polls
        );

        Ok(SolutionImport {
            solution: staged.solution_details,
            import_job_key: started.import_job_key,
            async_operation: operation.result.unwrap_or_default(),
            polls: operation.polls,
        })
    }

    async fn stage(&self, ctx: &CallContext, environment_url: &str, content: &[u8]) -> ApiResult<StageSolutionResults> {
        let body = StageSolutionRequest {
            customization_file: STANDARD.encode(content),
        };
        let request = ApiRequest::post(stage_solution_endpoint(environment_url))
            .json(&body)?
            .expect(&[200]);
        let (response, staged) = self.api.execute_for::<StageSolutionResponse>(ctx, &request).await?;
        let results = staged
            .ok_or_else(|| ApiError::empty_body(response.status))?
            .stage_solution_results;

        match results.failure() {
            Some(message) => Err(ApiError::OperationFailed {
                poll_url: request.url,
                message,
            }),
            None => Ok(results),
        }
    }

    async fn verify_import(&self, ctx: &CallContext, environment_url: &str, import_job_key: &str) -> ApiResult<()> {
        let request = ApiRequest::get(solution_import_result_endpoint(environment_url, import_job_key)).expect(&[200]);
        let (response, result) = self.api.execute_for::<SolutionImportResult>(ctx, &request).await?;
        let result = result
            .ok_or_else(|| ApiError::empty_body(response.status))?
            .solution_operation_result;

        if result.status != "Passed" {
            let errors = result
                .error_messages
                .iter()
                .map(|m| m.as_str().map(str::to_string).unwrap_or_else(|| m.to_string()))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ApiError::OperationFailed {
                poll_url: request.url,
                message: format!("solution import failed: {}", errors),
            });
        }
        Ok(())
    }
}
