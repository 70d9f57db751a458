//! API constants and endpoint builders for the Power Platform API families

/// Dataverse Web API version
pub const DATAVERSE_API_VERSION: &str = "v9.2";

/// Base API path for Dataverse
pub const DATAVERSE_API_BASE_PATH: &str = "/api/data";

/// Full Dataverse API path with version
pub fn dataverse_api_path() -> String {
    format!("{}/{}", DATAVERSE_API_BASE_PATH, DATAVERSE_API_VERSION)
}

/// Query parameter carrying the API version on BAPI / Power Platform API calls
pub const API_VERSION_PARAM: &str = "api-version";

/// BAPI (business app platform) API version
pub const BAPI_API_VERSION: &str = "2023-06-01";

/// Application management API version
pub const APP_MANAGEMENT_API_VERSION: &str = "2022-03-01-preview";

/// Licensing (billing policy) API version
pub const LICENSING_API_VERSION: &str = "2022-03-01-preview";

/// Standard headers used across the API families
pub mod headers {
    /// Content type for JSON requests
    pub const CONTENT_TYPE_JSON: &str = "application/json";

    /// Poll URL for BAPI lifecycle operations
    pub const LOCATION: &str = "Location";

    /// Poll URL for Power Platform API operations
    pub const OPERATION_LOCATION: &str = "Operation-Location";

    pub const RETRY_AFTER: &str = "Retry-After";

    /// Correlation headers, only sent when telemetry is enabled
    pub const REQUEST_ID: &str = "Request-Id";
    pub const CORRELATION_CONTEXT: &str = "Correlation-Context";

    /// OData version header
    pub const ODATA_VERSION: &str = "4.0";
}

fn trim_base(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

/// Create a new environment through BAPI
pub fn environment_create_endpoint(bapi_url: &str) -> String {
    format!(
        "{}/providers/Microsoft.BusinessAppPlatform/environments?{}={}",
        trim_base(bapi_url),
        API_VERSION_PARAM,
        BAPI_API_VERSION
    )
}

/// Admin scoped environment record (read / delete)
pub fn environment_endpoint(bapi_url: &str, environment_id: &str) -> String {
    format!(
        "{}/providers/Microsoft.BusinessAppPlatform/scopes/admin/environments/{}?{}={}",
        trim_base(bapi_url),
        environment_id,
        API_VERSION_PARAM,
        BAPI_API_VERSION
    )
}

/// Resolve a BAPI relative path (as returned in lifecycle links) against the BAPI base
pub fn bapi_path_endpoint(bapi_url: &str, path: &str) -> String {
    let separator = if path.contains('?') { '&' } else { '?' };
    format!(
        "{}/{}{}{}={}",
        trim_base(bapi_url),
        path.trim_start_matches('/'),
        separator,
        API_VERSION_PARAM,
        BAPI_API_VERSION
    )
}

/// Stage a solution file in a Dataverse environment
pub fn stage_solution_endpoint(environment_url: &str) -> String {
    format!("{}{}/StageSolution", trim_base(environment_url), dataverse_api_path())
}

/// Start an asynchronous solution import
pub fn import_solution_async_endpoint(environment_url: &str) -> String {
    format!("{}{}/ImportSolutionAsync", trim_base(environment_url), dataverse_api_path())
}

/// Dataverse async operation record
pub fn async_operation_endpoint(environment_url: &str, async_operation_id: &str) -> String {
    format!(
        "{}{}/asyncoperations({})",
        trim_base(environment_url),
        dataverse_api_path(),
        async_operation_id
    )
}

/// Result of a finished solution import job
pub fn solution_import_result_endpoint(environment_url: &str, import_job_key: &str) -> String {
    format!(
        "{}{}/RetrieveSolutionImportResult(ImportJobId={})",
        trim_base(environment_url),
        dataverse_api_path(),
        import_job_key
    )
}

/// Install an application package into an environment
pub fn application_install_endpoint(
    powerplatform_url: &str,
    environment_id: &str,
    unique_name: &str,
) -> String {
    format!(
        "{}/appmanagement/environments/{}/applicationPackages/{}/install?{}={}",
        trim_base(powerplatform_url),
        environment_id,
        unique_name,
        API_VERSION_PARAM,
        APP_MANAGEMENT_API_VERSION
    )
}

/// Billing policy record
pub fn billing_policy_endpoint(powerplatform_url: &str, billing_policy_id: &str) -> String {
    format!(
        "{}/licensing/billingPolicies/{}?{}={}",
        trim_base(powerplatform_url),
        billing_policy_id,
        API_VERSION_PARAM,
        LICENSING_API_VERSION
    )
}

/// Add or remove environments from a billing policy (`action` is `add` or `remove`)
pub fn billing_policy_environments_endpoint(
    powerplatform_url: &str,
    billing_policy_id: &str,
    action: &str,
) -> String {
    format!(
        "{}/licensing/billingPolicies/{}/environments/{}?{}={}",
        trim_base(powerplatform_url),
        billing_policy_id,
        action,
        API_VERSION_PARAM,
        LICENSING_API_VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataverse_endpoints() {
        let env = "https://contoso.crm.dynamics.com/";
        assert_eq!(
            stage_solution_endpoint(env),
            "https://contoso.crm.dynamics.com/api/data/v9.2/StageSolution"
        );
        assert_eq!(
            async_operation_endpoint(env, "42"),
            "https://contoso.crm.dynamics.com/api/data/v9.2/asyncoperations(42)"
        );
        assert_eq!(
            solution_import_result_endpoint(env, "job"),
            "https://contoso.crm.dynamics.com/api/data/v9.2/RetrieveSolutionImportResult(ImportJobId=job)"
        );
    }

    #[test]
    fn test_bapi_path_endpoint_appends_api_version() {
        assert_eq!(
            bapi_path_endpoint("https://api.bap.microsoft.com", "/providers/x/environments/1"),
            "https://api.bap.microsoft.com/providers/x/environments/1?api-version=2023-06-01"
        );
        assert_eq!(
            bapi_path_endpoint("https://api.bap.microsoft.com/", "providers/x?$expand=y"),
            "https://api.bap.microsoft.com/providers/x?$expand=y&api-version=2023-06-01"
        );
    }

    #[test]
    fn test_billing_policy_endpoints() {
        assert_eq!(
            billing_policy_environments_endpoint("https://api.powerplatform.com", "bp1", "add"),
            "https://api.powerplatform.com/licensing/billingPolicies/bp1/environments/add?api-version=2022-03-01-preview"
        );
    }
}
