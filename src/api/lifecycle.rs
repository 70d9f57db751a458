//! Status strategies for the long-running call sites
//!
//! Each service reports progress in its own body shape. The poller loop is
//! shared; only the mapping from a decoded poll body to a [`PollOutcome`]
//! lives here.

use serde::{Deserialize, Serialize};

use super::poller::{OperationStatus, PollOutcome};

/// BAPI environment lifecycle operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleDto {
    pub id: String,
    pub links: LifecycleLinks,
    pub state: LifecycleState,
    #[serde(rename = "type")]
    pub operation_type: LifecycleState,
    pub created_date_time: String,
    pub last_action_date_time: String,
    pub requested_by: Option<LifecycleRequestedBy>,
    pub stages: Vec<LifecycleStage>,
    pub error: Option<LifecycleError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleLinks {
    #[serde(rename = "self")]
    pub self_link: LifecycleLink,
    pub environment: LifecycleLink,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleLink {
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleState {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleRequestedBy {
    pub id: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub principal_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleStage {
    pub id: String,
    pub name: String,
    pub state: LifecycleState,
    pub first_action_date_time: String,
    pub last_action_date_time: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleError {
    pub code: String,
    pub message: String,
}

impl LifecycleDto {
    /// Environment id from `links.environment.path`, e.g. `/providers/.../environments/<id>`
    pub fn environment_id(&self) -> Option<&str> {
        self.links
            .environment
            .path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentLifecycle;

impl OperationStatus for EnvironmentLifecycle {
    type Body = LifecycleDto;

    fn evaluate(&self, body: &LifecycleDto) -> PollOutcome {
        match body.state.id.as_str() {
            "Succeeded" => PollOutcome::Succeeded,
            "Failed" => {
                let mut message = format!("environment operation failed. provisioning state: {}", body.state.id);
                if let Some(error) = body.error.as_ref().filter(|e| !e.message.is_empty()) {
                    message.push_str(". ");
                    message.push_str(&error.message);
                }
                for stage in body.stages.iter().filter(|s| s.state.id == "Failed") {
                    message.push_str(&format!(". stage '{}' failed", stage.name));
                }
                PollOutcome::Failed(message)
            }
            _ => PollOutcome::InProgress,
        }
    }
}

/// Dataverse `asyncoperations(<id>)` record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncOperationDto {
    #[serde(rename = "asyncoperationid")]
    pub async_operation_id: String,
    #[serde(rename = "completedon", alias = "completedOn")]
    pub completed_on: Option<String>,
    #[serde(rename = "statecode")]
    pub state_code: Option<i32>,
    #[serde(rename = "statuscode")]
    pub status_code: Option<i32>,
    pub message: Option<String>,
    #[serde(rename = "friendlymessage")]
    pub friendly_message: Option<String>,
}

impl AsyncOperationDto {
    pub fn is_completed(&self) -> bool {
        self.completed_on.as_deref().is_some_and(|c| !c.is_empty())
    }
}

const ASYNC_STATUS_FAILED: i32 = 31;
const ASYNC_STATUS_CANCELED: i32 = 32;

#[derive(Debug, Clone, Copy, Default)]
pub struct AsyncOperationStatus;

impl OperationStatus for AsyncOperationStatus {
    type Body = AsyncOperationDto;

    fn evaluate(&self, body: &AsyncOperationDto) -> PollOutcome {
        if !body.is_completed() {
            return PollOutcome::InProgress;
        }
        match body.status_code {
            Some(ASYNC_STATUS_FAILED) | Some(ASYNC_STATUS_CANCELED) => PollOutcome::Failed(
                body.message
                    .clone()
                    .or_else(|| body.friendly_message.clone())
                    .unwrap_or_else(|| "asynchronous operation did not complete successfully".to_string()),
            ),
            _ => PollOutcome::Succeeded,
        }
    }
}

/// Licensing billing policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BillingPolicyDto {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub tenant_type: String,
    pub status: String,
    pub location: String,
    pub created_on: Option<String>,
    pub last_modified_on: Option<String>,
}

/// Billing policies settle on `Enabled` or `Disabled`; anything else is transitional
#[derive(Debug, Clone, Copy, Default)]
pub struct BillingPolicyStatus;

impl OperationStatus for BillingPolicyStatus {
    type Body = BillingPolicyDto;

    fn evaluate(&self, body: &BillingPolicyDto) -> PollOutcome {
        match body.status.as_str() {
            "Enabled" | "Disabled" => PollOutcome::Succeeded,
            _ => PollOutcome::InProgress,
        }
    }
}

/// Application package install operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationLifecycleDto {
    pub operation_id: String,
    pub created_date_time: String,
    pub last_action_date_time: String,
    pub status: String,
    pub status_message: Option<String>,
    pub error: Option<ApplicationLifecycleError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationLifecycleError {
    pub error_code: String,
    pub error_name: String,
    pub message: String,
    pub source: String,
    pub status_code: i64,
    #[serde(rename = "type")]
    pub error_type: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplicationInstallStatus;

impl OperationStatus for ApplicationInstallStatus {
    type Body = ApplicationLifecycleDto;

    fn evaluate(&self, body: &ApplicationLifecycleDto) -> PollOutcome {
        match body.status.as_str() {
            "Succeeded" => PollOutcome::Succeeded,
            "Failed" | "Canceled" => {
                let detail = body
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .filter(|m| !m.is_empty())
                    .or_else(|| body.status_message.clone())
                    .unwrap_or_default();
                PollOutcome::Failed(format!("application installation failed. status message: {}", detail))
            }
            _ => PollOutcome::InProgress,
        }
    }
}
