//! Per-call cancellation, deadline and correlation data
//!
//! Every operation on the executor, poller and token provider takes a
//! [`CallContext`]. Cancelling the context (or passing its deadline) aborts
//! in-flight HTTP calls and poll sleeps promptly with [`ApiError::Cancelled`];
//! the poller reports a lapsed deadline as an operation timeout instead.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{ApiError, ApiResult};

#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    request_id: String,
    object_name: Option<String>,
    request_type: Option<String>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Context bound to an externally owned cancellation token
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
            request_id: uuid::Uuid::new_v4().simple().to_string(),
            object_name: None,
            request_type: None,
        }
    }

    /// Child context that additionally expires after `timeout`.
    /// Cancelling the parent cancels the child as well.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
            request_id: self.request_id.clone(),
            object_name: self.object_name.clone(),
            request_type: self.request_type.clone(),
        }
    }

    /// Tag the context with the resource object and request type used in correlation headers
    pub fn for_object(mut self, object_name: impl Into<String>, request_type: impl Into<String>) -> Self {
        self.object_name = Some(object_name.into());
        self.request_type = Some(request_type.into());
        self
    }

    pub fn object(&self) -> Option<(&str, &str)> {
        Some((self.object_name.as_deref()?, self.request_type.as_deref()?))
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True once the deadline has passed without an explicit cancellation
    pub fn deadline_exceeded(&self) -> bool {
        !self.cancel.is_cancelled() && self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or its deadline has passed
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Run `fut` unless the context finishes first
    pub async fn run<F>(&self, fut: F) -> ApiResult<F::Output>
    where
        F: Future,
    {
        if self.is_done() {
            return Err(ApiError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.done() => Err(ApiError::Cancelled),
            output = fut => Ok(output),
        }
    }

    /// Cancellable sleep
    pub async fn sleep(&self, duration: Duration) -> ApiResult<()> {
        self.run(tokio::time::sleep(duration)).await
    }

    /// `Request-Id` and `Correlation-Context` header values
    pub fn correlation_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![(
            super::constants::headers::REQUEST_ID,
            format!("|{}.{:016x}.", self.request_id, rand::random::<u64>()),
        )];

        let mut context = Vec::new();
        if let Some(object_name) = &self.object_name {
            context.push(format!("objectName={}", object_name));
        }
        if let Some(request_type) = &self.request_type {
            context.push(format!("requestType={}", request_type));
        }
        if !context.is_empty() {
            headers.push((super::constants::headers::CORRELATION_CONTEXT, context.join(",")));
        }

        headers
    }
}
