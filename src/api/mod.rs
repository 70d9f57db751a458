//! Power Platform API core
//!
//! One generic executor serves every API family (BAPI, Power Apps, Power
//! Platform API, licensing and per-environment Dataverse hosts). Callers hand
//! it an [`ApiRequest`]; the executor resolves the OAuth scope from the
//! request host, attaches a bearer token, validates the status code and
//! returns the raw [`ApiResponse`]. Endpoints answering `202 Accepted` are
//! driven to completion by the [`OperationPoller`].

pub mod client;
pub mod constants;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod manager;
pub mod poller;
pub mod request;
pub mod response;
pub mod scope;

pub use client::ApiClient;
pub use context::CallContext;
pub use error::{ApiError, ApiResult};
pub use lifecycle::{
    ApplicationInstallStatus, ApplicationLifecycleDto, AsyncOperationDto, AsyncOperationStatus,
    BillingPolicyDto, BillingPolicyStatus, EnvironmentLifecycle, LifecycleDto,
};
pub use logging::ApiLogger;
pub use manager::{ClientManager, TEST_MODE_TOKEN};
pub use poller::{
    LongRunningOperation, OperationPoller, OperationState, OperationStatus, PollConfig,
    PollLocation, PollOutcome, RemoteStatus,
};
pub use request::ApiRequest;
pub use response::ApiResponse;
pub use scope::ScopeResolver;
