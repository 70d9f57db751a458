//! Typed clients for the long-running Power Platform operations
//!
//! Each client builds its URLs, calls the shared [`ApiClient`](crate::api::ApiClient)
//! and hands accepted responses to the [`OperationPoller`](crate::api::OperationPoller)
//! with the status strategy matching its body schema.

pub mod application;
pub mod environment;
pub mod licensing;
pub mod solution;

pub use application::{ApplicationClient, ApplicationInstall};
pub use environment::{EnvironmentClient, EnvironmentCreateDto, EnvironmentDto};
pub use licensing::LicensingClient;
pub use solution::{SolutionClient, SolutionImport, SolutionImportResult};

use crate::config::CloudUrls;

/// Base URLs of the management APIs the service clients talk to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub bapi_url: String,
    pub powerplatform_url: String,
}

impl ServiceEndpoints {
    pub fn for_cloud(urls: &CloudUrls) -> Self {
        Self {
            bapi_url: urls.bapi_url(),
            powerplatform_url: urls.powerplatform_url(),
        }
    }

    /// Every API family served from one base URL (mock servers, proxies)
    pub fn single(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            bapi_url: base_url.clone(),
            powerplatform_url: base_url,
        }
    }
}
