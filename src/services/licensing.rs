use log::debug;
use serde::Serialize;

use super::ServiceEndpoints;
use crate::api::constants::{billing_policy_endpoint, billing_policy_environments_endpoint};
use crate::api::{
    ApiClient, ApiError, ApiRequest, ApiResult, BillingPolicyDto, BillingPolicyStatus, CallContext,
    OperationPoller, OperationStatus, PollOutcome,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BillingPolicyEnvironmentsDto<'a> {
    environment_ids: &'a [String],
}

/// Billing policy membership changes
#[derive(Clone)]
pub struct LicensingClient {
    api: ApiClient,
    poller: OperationPoller,
    endpoints: ServiceEndpoints,
}

impl LicensingClient {
    pub fn new(api: ApiClient, poller: OperationPoller, endpoints: ServiceEndpoints) -> Self {
        Self { api, poller, endpoints }
    }

    pub async fn get_billing_policy(&self, ctx: &CallContext, billing_policy_id: &str) -> ApiResult<BillingPolicyDto> {
        let request =
            ApiRequest::get(billing_policy_endpoint(&self.endpoints.powerplatform_url, billing_policy_id)).expect(&[200]);
        let (response, policy) = self.api.execute_for::<BillingPolicyDto>(ctx, &request).await?;
        policy.ok_or_else(|| ApiError::empty_body(response.status))
    }

    pub async fn add_environments(
        &self,
        ctx: &CallContext,
        billing_policy_id: &str,
        environment_ids: &[String],
    ) -> ApiResult<Option<BillingPolicyDto>> {
        self.change_environments(ctx, billing_policy_id, "add", environment_ids)
            .await
    }

    pub async fn remove_environments(
        &self,
        ctx: &CallContext,
        billing_policy_id: &str,
        environment_ids: &[String],
    ) -> ApiResult<Option<BillingPolicyDto>> {
        self.change_environments(ctx, billing_policy_id, "remove", environment_ids)
            .await
    }

    /// Returns `None` when there was nothing to change, otherwise the settled policy
    async fn change_environments(
        &self,
        ctx: &CallContext,
        billing_policy_id: &str,
        action: &str,
        environment_ids: &[String],
    ) -> ApiResult<Option<BillingPolicyDto>> {
        if environment_ids.is_empty() {
            return Ok(None);
        }

        let url = billing_policy_environments_endpoint(&self.endpoints.powerplatform_url, billing_policy_id, action);
        let request = ApiRequest::post(url)
            .json(&BillingPolicyEnvironmentsDto { environment_ids })?
            .expect(&[200]);
        self.api.execute(ctx, &request).await?;

        let policy = self.get_billing_policy(ctx, billing_policy_id).await?;
        if BillingPolicyStatus.evaluate(&policy) == PollOutcome::Succeeded {
            return Ok(Some(policy));
        }

        debug!("Billing policy {} is {}, waiting for it to settle", billing_policy_id, policy.status);
        let operation = self
            .poller
            .wait_at(
                ctx,
                billing_policy_endpoint(&self.endpoints.powerplatform_url, billing_policy_id),
                &BillingPolicyStatus,
            )
            .await?;
        Ok(operation.result)
    }
}
