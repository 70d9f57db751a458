//! Structured logging with correlation tracking for API calls and polls
//!
//! Every line is a JSON object tagged with the call's request id so that the
//! initiating request, its token refresh and every poll of the resulting
//! operation can be grouped together.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::{Level, debug, info, log_enabled, warn};
use reqwest::header::HeaderMap;
use serde_json::json;

use super::context::CallContext;

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Default)]
pub struct ApiLogger {
    /// Include response body excerpts in error log lines
    log_error_bodies: bool,
}

/// Tracking data for a single HTTP exchange
#[derive(Debug, Clone)]
pub struct RequestTrace {
    pub correlation_id: String,
    pub method: String,
    pub url: String,
    pub attempt: u32,
    start_time: Instant,
}

impl RequestTrace {
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl ApiLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_bodies(mut self, enabled: bool) -> Self {
        self.log_error_bodies = enabled;
        self
    }

    pub fn start_request(&self, ctx: &CallContext, method: &str, url: &str, attempt: u32) -> RequestTrace {
        RequestTrace {
            correlation_id: ctx.request_id().to_string(),
            method: method.to_string(),
            url: url.to_string(),
            attempt,
            start_time: Instant::now(),
        }
    }

    pub fn log_request(&self, trace: &RequestTrace, headers: &[(String, String)]) {
        if !log_enabled!(Level::Debug) {
            return;
        }

        let log_data = json!({
            "event": "http_request",
            "correlation_id": trace.correlation_id,
            "method": trace.method,
            "url": trace.url,
            "attempt": trace.attempt,
            "headers": sanitize_headers(headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        debug!("HTTP Request: {}", log_data);
    }

    pub fn log_response(&self, trace: &RequestTrace, status: u16, headers: &HeaderMap, body_excerpt: &str) {
        let is_error = status >= 400;
        if !log_enabled!(if is_error { Level::Warn } else { Level::Debug }) {
            return;
        }

        let mut log_data = json!({
            "event": "http_response",
            "correlation_id": trace.correlation_id,
            "method": trace.method,
            "url": trace.url,
            "status_code": status,
            "duration_ms": trace.elapsed().as_millis(),
            "headers": sanitize_headers(
                headers.iter().map(|(k, v)| (k.as_str(), v.to_str().unwrap_or("<binary>")))
            ),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        if is_error {
            if self.log_error_bodies {
                log_data["body"] = json!(body_excerpt);
            }
            warn!("HTTP Response (Error): {}", log_data);
        } else {
            debug!("HTTP Response: {}", log_data);
        }
    }

    pub fn log_transport_error(&self, trace: &RequestTrace, error: &reqwest::Error) {
        let log_data = json!({
            "event": "transport_error",
            "correlation_id": trace.correlation_id,
            "method": trace.method,
            "url": trace.url,
            "duration_ms": trace.elapsed().as_millis(),
            "error": error.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        warn!("HTTP Transport Error: {}", log_data);
    }

    pub fn log_token_refresh(&self, ctx: &CallContext, url: &str, scope: &str) {
        let log_data = json!({
            "event": "forced_token_refresh",
            "correlation_id": ctx.request_id(),
            "url": url,
            "scope": scope,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        warn!("Unauthorized, refreshing token: {}", log_data);
    }

    pub fn log_poll(&self, ctx: &CallContext, poll_url: &str, poll: u32, state: &str, next_delay: Option<Duration>) {
        if !log_enabled!(Level::Debug) {
            return;
        }

        let log_data = json!({
            "event": "operation_poll",
            "correlation_id": ctx.request_id(),
            "poll_url": poll_url,
            "poll": poll,
            "state": state,
            "next_delay_ms": next_delay.map(|d| d.as_millis()),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        debug!("Operation Poll: {}", log_data);
    }

    pub fn log_operation_finished(&self, ctx: &CallContext, poll_url: &str, polls: u32, elapsed: Duration, state: &str) {
        let log_data = json!({
            "event": "operation_finished",
            "correlation_id": ctx.request_id(),
            "poll_url": poll_url,
            "polls": polls,
            "duration_ms": elapsed.as_millis(),
            "state": state,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        info!("Operation Finished: {}", log_data);
    }
}

/// Mask credentials before headers reach the log
fn sanitize_headers<'a>(headers: impl Iterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, String> {
    headers
        .map(|(key, value)| {
            let key_lower = key.to_ascii_lowercase();
            let value = if key_lower.contains("authorization")
                || key_lower.contains("token")
                || key_lower.contains("cookie")
            {
                REDACTED.to_string()
            } else {
                value.to_string()
            };
            (key.to_string(), value)
        })
        .collect()
}
