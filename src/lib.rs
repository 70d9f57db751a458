//! Authenticated request and long-running operation core for the Power Platform APIs.
//!
//! The crate is organised leaves first:
//!
//! * [`auth`] acquires and caches OAuth tokens (silent, device code,
//!   username/password and interactive browser flows).
//! * [`api`] resolves scopes from hosts, executes HTTP calls with status
//!   validation and a single forced token refresh on `401`, and drives
//!   `202 Accepted` long-running operations to a terminal state.
//! * [`services`] holds the typed call sites that rely on polling
//!   (environment lifecycle, solution import, application install and
//!   billing policy membership).
//! * [`config`] loads the provider configuration and per-cloud endpoints.

pub mod api;
pub mod auth;
pub mod config;
pub mod services;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, CallContext, ClientManager};
pub use auth::{AuthError, AuthMode, TokenProvider};
pub use config::ProviderConfig;
