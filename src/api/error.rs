//! Error type for API execution and long-running operation polling

use std::time::Duration;

use thiserror::Error;

use crate::auth::AuthError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request URL '{url}': {reason}")]
    UrlFormat { url: String, reason: String },

    #[error("no OAuth scope is known for host '{host}'")]
    UnknownHost { host: String },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{method} {url} failed: {source}")]
    Transport {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} was rejected with 401 Unauthorized. {body_excerpt}")]
    Unauthorized { url: String, body_excerpt: String },

    #[error("unexpected HTTP status code: expected {}, received [{actual}]. {body_excerpt}", format_expected(.expected))]
    UnexpectedHttpReturnCode {
        actual: u16,
        expected: Vec<u16>,
        body_excerpt: String,
    },

    #[error("failed to decode response body (status {status}): {source}. {body_excerpt}")]
    MalformedResponseBody {
        status: u16,
        body_excerpt: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize request body: {0}")]
    RequestBody(#[source] serde_json::Error),

    #[error("operation was not accepted for asynchronous processing (status {status})")]
    NotAccepted { status: u16 },

    #[error("response with status {status} carried no '{header}' header to poll")]
    MissingPollLocation { status: u16, header: String },

    #[error("operation at {poll_url} failed: {message}")]
    OperationFailed { poll_url: String, message: String },

    #[error(
        "operation at {poll_url} did not finish within {elapsed:?} ({polls} polls). \
         It may still be running remotely; re-run to pick up its final state"
    )]
    OperationTimedOut {
        poll_url: String,
        elapsed: Duration,
        polls: u32,
    },

    #[error("operation cancelled")]
    Cancelled,
}

fn format_expected(expected: &[u16]) -> String {
    if expected.is_empty() {
        "any 2xx".to_string()
    } else {
        format!("{:?}", expected)
    }
}

impl ApiError {
    /// A response the caller needed a body from came back empty
    pub fn empty_body(status: u16) -> Self {
        ApiError::MalformedResponseBody {
            status,
            body_excerpt: String::new(),
            source: serde::de::Error::custom("empty response body"),
        }
    }

    /// HTTP status code carried by the error, when one was received
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::UnexpectedHttpReturnCode { actual, .. } => Some(*actual),
            ApiError::MalformedResponseBody { status, .. } => Some(*status),
            ApiError::NotAccepted { status } => Some(*status),
            ApiError::MissingPollLocation { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, ApiError::OperationTimedOut { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled | ApiError::Auth(AuthError::Cancelled))
    }
}
