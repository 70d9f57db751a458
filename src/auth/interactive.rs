//! Browser based authorization code + PKCE sign-in
//!
//! A short-lived axum server on the loopback interface receives the redirect
//! carrying the authorization code.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use log::{debug, warn};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::AuthError;

const SUCCESS_PAGE: &str = "<html><body><h3>Authentication complete.</h3>\
    <p>You can close this window and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h3>Authentication failed.</h3>\
    <p>Return to the terminal for details.</p></body></html>";

pub fn open_browser(url: &str) -> Result<(), AuthError> {
    webbrowser::open(url)
        .map_err(|e| AuthError::InteractionRequired(format!("failed to open a browser: {}", e)))
}

#[derive(Clone)]
struct RedirectState {
    expected_state: Arc<str>,
    outcome: mpsc::Sender<Result<String, AuthError>>,
}

pub struct RedirectListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl RedirectListener {
    pub async fn bind() -> Result<Self, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        debug!("Listening for the authorization redirect on {}", addr);
        Ok(Self { listener, addr })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/", self.addr.port())
    }

    /// Serve until the redirect arrives and return the authorization code.
    /// The server shuts down once this returns or is dropped.
    pub async fn accept_code(self, expected_state: &str) -> Result<String, AuthError> {
        let (sender, mut receiver) = mpsc::channel(1);
        let app = Router::new().route("/", get(receive_redirect)).with_state(RedirectState {
            expected_state: Arc::from(expected_state),
            outcome: sender,
        });

        let shutdown = CancellationToken::new();
        let _stop_on_drop = shutdown.clone().drop_guard();
        let server = axum::serve(self.listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned());
        tokio::spawn(async move {
            if let Err(e) = server.await {
                warn!("Redirect listener stopped with an error: {}", e);
            }
        });

        let outcome = receiver.recv().await;
        shutdown.cancel();

        outcome.unwrap_or_else(|| {
            Err(AuthError::Identity {
                error: "listener_closed".to_string(),
                description: "the redirect listener stopped before a response arrived".to_string(),
            })
        })
    }
}

async fn receive_redirect(
    State(state): State<RedirectState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    if !params.contains_key("code") && !params.contains_key("error") {
        return (StatusCode::NOT_FOUND, Html(""));
    }

    let outcome = redirect_outcome(&params, &state.expected_state);
    let page = if outcome.is_ok() { SUCCESS_PAGE } else { FAILURE_PAGE };
    if state.outcome.try_send(outcome).is_err() {
        debug!("Ignoring a repeated authorization redirect");
    }
    (StatusCode::OK, Html(page))
}

fn redirect_outcome(params: &HashMap<String, String>, expected_state: &str) -> Result<String, AuthError> {
    if let Some(error) = params.get("error") {
        let description = params.get("error_description").cloned().unwrap_or_default();
        return Err(match error.as_str() {
            "access_denied" => AuthError::UserCancelled(description),
            "interaction_required" | "consent_required" | "login_required" => {
                AuthError::InteractionRequired(description)
            }
            _ => AuthError::Identity {
                error: error.clone(),
                description,
            },
        });
    }

    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Err(AuthError::Identity {
            error: "state_mismatch".to_string(),
            description: "redirect state does not match the authorization request".to_string(),
        });
    }

    params
        .get("code")
        .cloned()
        .ok_or_else(|| AuthError::Identity {
            error: "missing_code".to_string(),
            description: "redirect carried no authorization code".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_redirect_outcomes() {
        let ok = params(&[("code", "abc d"), ("state", "s1")]);
        assert_eq!(redirect_outcome(&ok, "s1").unwrap(), "abc d");
        assert!(matches!(
            redirect_outcome(&ok, "other"),
            Err(AuthError::Identity { error, .. }) if error == "state_mismatch"
        ));

        let denied = params(&[("error", "access_denied"), ("error_description", "user said no")]);
        assert!(matches!(
            redirect_outcome(&denied, "s1"),
            Err(AuthError::UserCancelled(msg)) if msg == "user said no"
        ));
    }

    #[tokio::test]
    async fn test_listener_receives_code() {
        let listener = RedirectListener::bind().await.unwrap();
        let base = format!("http://127.0.0.1:{}", listener.port());

        let browser = tokio::spawn(async move {
            let http = reqwest::Client::new();
            let favicon = http.get(format!("{}/favicon.ico", base)).send().await.unwrap().status();
            let redirect = http
                .get(format!("{}/?code=the%20code&state=xyz", base))
                .send()
                .await
                .unwrap();
            (favicon, redirect.status(), redirect.text().await.unwrap())
        });

        assert_eq!(listener.accept_code("xyz").await.unwrap(), "the code");

        let (favicon, status, page) = browser.await.unwrap();
        assert_eq!(favicon, reqwest::StatusCode::NOT_FOUND);
        assert_eq!(status, reqwest::StatusCode::OK);
        assert!(page.contains("Authentication complete"));
    }

    #[tokio::test]
    async fn test_listener_reports_denied_sign_in() {
        let listener = RedirectListener::bind().await.unwrap();
        let url = format!(
            "http://127.0.0.1:{}/?error=access_denied&error_description=declined&state=xyz",
            listener.port()
        );
        let browser = tokio::spawn(async move { reqwest::get(url).await.unwrap().status() });

        let err = listener.accept_code("xyz").await.unwrap_err();
        assert!(matches!(err, AuthError::UserCancelled(msg) if msg == "declined"));
        assert_eq!(browser.await.unwrap(), reqwest::StatusCode::OK);
    }
}
