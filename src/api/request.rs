use reqwest::Method;
use serde::Serialize;

use super::error::{ApiError, ApiResult};

/// A single API call: method, absolute URL, headers, body and accepted status codes.
///
/// The body is serialized once when the request is built, so a retry after a
/// forced token refresh resends exactly the same bytes.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub expected_status_codes: Vec<u16>,
    pub replay_on_unauthorized: bool,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            expected_status_codes: Vec::new(),
            replay_on_unauthorized: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> ApiResult<Self> {
        self.body = Some(serde_json::to_vec(body).map_err(ApiError::RequestBody)?);
        Ok(self)
    }

    /// Raw body, sent as-is
    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into().into_bytes());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn expect(mut self, status_codes: &[u16]) -> Self {
        self.expected_status_codes = status_codes.to_vec();
        self
    }

    /// Surface the first 401 instead of refreshing the token and resending the body
    pub fn no_auth_replay(mut self) -> Self {
        self.replay_on_unauthorized = false;
        self
    }

    /// An empty expected set accepts any 2xx status
    pub fn expects(&self, status: u16) -> bool {
        if self.expected_status_codes.is_empty() {
            (200..300).contains(&status)
        } else {
            self.expected_status_codes.contains(&status)
        }
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case(name))
    }
}
