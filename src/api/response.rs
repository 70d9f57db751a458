use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

use super::constants::headers;
use super::error::{ApiError, ApiResult};

const BODY_EXCERPT_LEN: usize = 512;

/// Raw response envelope; the caller decides how to decode the body
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Decode the body as JSON. An empty body yields `None`.
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<Option<T>> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&self.body)
            .map(Some)
            .map_err(|source| ApiError::MalformedResponseBody {
                status: self.status,
                body_excerpt: self.body_excerpt(),
                source,
            })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_excerpt(&self) -> String {
        excerpt(&self.body)
    }

    /// `Retry-After` given in whole seconds
    pub fn retry_after(&self) -> Option<Duration> {
        self.header(headers::RETRY_AFTER)
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

pub(crate) fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    }
}
