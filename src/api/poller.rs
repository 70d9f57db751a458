//! Long-running operation polling
//!
//! Endpoints that finish asynchronously answer `202 Accepted` (sometimes
//! `201`) with a `Location` or `Operation-Location` header. The poller GETs
//! that URL until the per-call-site [`OperationStatus`] strategy reports a
//! terminal status or the operation timeout elapses.
//!
//! ```text
//! Submitted -> Polling -> Polling ... -> Succeeded | Failed | TimedOut
//! ```

use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::time::Instant;

use super::client::ApiClient;
use super::constants::headers;
use super::context::CallContext;
use super::error::{ApiError, ApiResult};
use super::logging::ApiLogger;
use super::request::ApiRequest;
use super::response::ApiResponse;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Header carrying the poll URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollLocation {
    Location,
    OperationLocation,
}

impl PollLocation {
    pub fn header_name(&self) -> &'static str {
        match self {
            PollLocation::Location => headers::LOCATION,
            PollLocation::OperationLocation => headers::OPERATION_LOCATION,
        }
    }

    fn fallback(&self) -> PollLocation {
        match self {
            PollLocation::Location => PollLocation::OperationLocation,
            PollLocation::OperationLocation => PollLocation::Location,
        }
    }

    /// Poll URL from `response`, trying the other header when this one is absent
    pub fn resolve(&self, response: &ApiResponse) -> Option<String> {
        response
            .header(self.header_name())
            .or_else(|| response.header(self.fallback().header_name()))
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    InProgress,
    Succeeded,
    /// Remote failure, message as reported by the service
    Failed(String),
}

/// Per-call-site interpretation of a poll response body
pub trait OperationStatus: Send + Sync {
    type Body: DeserializeOwned + Send;

    fn evaluate(&self, body: &Self::Body) -> PollOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Submitted,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Succeeded | OperationState::Failed | OperationState::TimedOut
        )
    }

    fn as_str(&self) -> &'static str {
        match self {
            OperationState::Submitted => "Submitted",
            OperationState::Polling => "Polling",
            OperationState::Succeeded => "Succeeded",
            OperationState::Failed => "Failed",
            OperationState::TimedOut => "TimedOut",
        }
    }
}

/// Last status reported by the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct LongRunningOperation<B> {
    pub poll_url: String,
    pub state: OperationState,
    pub status: RemoteStatus,
    /// Last decoded poll body
    pub result: Option<B>,
    pub polls: u32,
    pub elapsed: Duration,
}

impl<B> LongRunningOperation<B> {
    pub fn new(poll_url: impl Into<String>) -> Self {
        Self {
            poll_url: poll_url.into(),
            state: OperationState::Submitted,
            status: RemoteStatus::Unknown,
            result: None,
            polls: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Operation acknowledged by `initiating`; only `201`/`202` responses start one
    pub fn submitted(initiating: &ApiResponse, location: PollLocation) -> ApiResult<Self> {
        if initiating.status != 201 && initiating.status != 202 {
            return Err(ApiError::NotAccepted {
                status: initiating.status,
            });
        }

        let poll_url = location
            .resolve(initiating)
            .ok_or_else(|| ApiError::MissingPollLocation {
                status: initiating.status,
                header: location.header_name().to_string(),
            })?;

        Ok(Self::new(poll_url))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct OperationPoller {
    client: ApiClient,
    config: PollConfig,
}

impl OperationPoller {
    pub fn new(client: ApiClient, config: PollConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }

    /// Copy of this poller with another operation timeout
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            client: self.client.clone(),
            config: PollConfig {
                timeout,
                ..self.config
            },
        }
    }

    /// Drive the operation started by `initiating` to a terminal state.
    ///
    /// A numeric `Retry-After` on the initiating response replaces the
    /// configured poll interval.
    pub async fn wait<S: OperationStatus>(
        &self,
        ctx: &CallContext,
        initiating: &ApiResponse,
        location: PollLocation,
        strategy: &S,
    ) -> ApiResult<LongRunningOperation<S::Body>> {
        let operation = LongRunningOperation::submitted(initiating, location)?;
        let interval = initiating
            .retry_after()
            .filter(|d| !d.is_zero())
            .unwrap_or(self.config.interval);
        self.drive(ctx, operation, interval, strategy).await
    }

    /// Poll a URL obtained some other way (e.g. an async operation id in a response body)
    pub async fn wait_at<S: OperationStatus>(
        &self,
        ctx: &CallContext,
        poll_url: impl Into<String>,
        strategy: &S,
    ) -> ApiResult<LongRunningOperation<S::Body>> {
        self.drive(ctx, LongRunningOperation::new(poll_url), self.config.interval, strategy)
            .await
    }

    async fn drive<S: OperationStatus>(
        &self,
        ctx: &CallContext,
        mut operation: LongRunningOperation<S::Body>,
        interval: Duration,
        strategy: &S,
    ) -> ApiResult<LongRunningOperation<S::Body>> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;
        let logger = self.client.logger();
        let request = ApiRequest::get(operation.poll_url.clone()).expect(&[200, 404]);

        operation.state = OperationState::Polling;
        loop {
            operation.polls += 1;
            let response = match self.client.execute(ctx, &request).await {
                Ok(response) => response,
                Err(e) => return Err(interrupted(ctx, logger, e, operation, started)),
            };

            let outcome = if response.status == 404 {
                PollOutcome::InProgress
            } else {
                match response.json::<S::Body>()? {
                    Some(body) => {
                        let outcome = strategy.evaluate(&body);
                        operation.result = Some(body);
                        outcome
                    }
                    None => PollOutcome::InProgress,
                }
            };
            operation.elapsed = started.elapsed();

            match outcome {
                PollOutcome::Succeeded => {
                    operation.state = OperationState::Succeeded;
                    operation.status = RemoteStatus::Succeeded;
                    logger.log_operation_finished(
                        ctx,
                        &operation.poll_url,
                        operation.polls,
                        operation.elapsed,
                        operation.state.as_str(),
                    );
                    return Ok(operation);
                }
                PollOutcome::Failed(message) => {
                    operation.state = OperationState::Failed;
                    operation.status = RemoteStatus::Failed;
                    logger.log_operation_finished(
                        ctx,
                        &operation.poll_url,
                        operation.polls,
                        operation.elapsed,
                        operation.state.as_str(),
                    );
                    return Err(ApiError::OperationFailed {
                        poll_url: operation.poll_url,
                        message,
                    });
                }
                PollOutcome::InProgress => {
                    operation.status = RemoteStatus::Running;
                    let now = Instant::now();
                    if now >= deadline {
                        operation.state = OperationState::TimedOut;
                        logger.log_operation_finished(
                            ctx,
                            &operation.poll_url,
                            operation.polls,
                            operation.elapsed,
                            operation.state.as_str(),
                        );
                        return Err(ApiError::OperationTimedOut {
                            poll_url: operation.poll_url,
                            elapsed: operation.elapsed,
                            polls: operation.polls,
                        });
                    }

                    let wake = (now + interval).min(deadline);
                    logger.log_poll(
                        ctx,
                        &operation.poll_url,
                        operation.polls,
                        "InProgress",
                        Some(wake - now),
                    );
                    if let Err(e) = ctx.run(tokio::time::sleep_until(wake)).await {
                        return Err(interrupted(ctx, logger, e, operation, started));
                    }
                }
            }
        }
    }
}

/// A caller deadline that lapses mid-poll leaves the remote state as unknown as
/// the poller's own timeout does, so it is reported the same way. Explicit
/// cancellation passes through unchanged.
fn interrupted<B>(
    ctx: &CallContext,
    logger: &ApiLogger,
    error: ApiError,
    mut operation: LongRunningOperation<B>,
    started: Instant,
) -> ApiError {
    if !error.is_cancelled() || !ctx.deadline_exceeded() {
        return error;
    }

    operation.elapsed = started.elapsed();
    operation.state = OperationState::TimedOut;
    logger.log_operation_finished(
        ctx,
        &operation.poll_url,
        operation.polls,
        operation.elapsed,
        operation.state.as_str(),
    );
    ApiError::OperationTimedOut {
        poll_url: operation.poll_url,
        elapsed: operation.elapsed,
        polls: operation.polls,
    }
}
