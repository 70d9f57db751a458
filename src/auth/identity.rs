//! OAuth2 wire flows against the Microsoft identity platform (v2.0 endpoints)

use log::debug;
use oauth2::basic::{BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse, BasicTokenType};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, DeviceAuthorizationResponse,
    DeviceAuthorizationUrl, DeviceCodeErrorResponseType, EndpointNotSet, EndpointSet,
    ErrorResponseType, ExtraDeviceAuthorizationFields, ExtraTokenFields, HttpClientError, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, ResourceOwnerPassword, ResourceOwnerUsername,
    Scope, StandardErrorResponse, StandardRevocableToken, StandardTokenResponse, TokenResponse as _, TokenUrl,
};
use serde::{Deserialize, Serialize};

use super::authority::Authority;
use super::error::AuthError;

/// Extra scopes requested with every `.default` scope so a refresh token and id token come back
const OIDC_SCOPES: [&str; 3] = ["offline_access", "openid", "profile"];

const DEFAULT_EXPIRES_IN: i64 = 3600;

/// The identity platform returns the OpenID id token next to the access token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenField {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceCodeMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl ExtraDeviceAuthorizationFields for DeviceCodeMessage {}

type GrantResponse = StandardTokenResponse<IdTokenField, BasicTokenType>;

type GrantError<T> = RequestTokenError<HttpClientError<reqwest::Error>, StandardErrorResponse<T>>;

/// Client with the authorize, device authorization and token endpoints of one authority set
type AuthorityClient = oauth2::Client<
    BasicErrorResponse,
    GrantResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Tokens handed back by any grant
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub id_token: Option<String>,
}

impl From<GrantResponse> for TokenResponse {
    fn from(response: GrantResponse) -> Self {
        Self {
            access_token: response.access_token().secret().clone(),
            refresh_token: response.refresh_token().map(|token| token.secret().clone()),
            expires_in: response
                .expires_in()
                .and_then(|expires_in| i64::try_from(expires_in.as_secs()).ok())
                .unwrap_or(DEFAULT_EXPIRES_IN),
            id_token: response.extra_fields().id_token.clone(),
        }
    }
}

/// Device code challenge shown to the user while the sign-in completes elsewhere
#[derive(Debug, Clone)]
pub struct DeviceCodeResponse {
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub interval: u64,
    pub message: Option<String>,
    authorization: DeviceAuthorizationResponse<DeviceCodeMessage>,
}

impl From<DeviceAuthorizationResponse<DeviceCodeMessage>> for DeviceCodeResponse {
    fn from(authorization: DeviceAuthorizationResponse<DeviceCodeMessage>) -> Self {
        Self {
            user_code: authorization.user_code().secret().clone(),
            verification_uri: authorization.verification_uri().to_string(),
            expires_in: authorization.expires_in().as_secs(),
            interval: authorization.interval().as_secs(),
            message: authorization.extra_fields().message.clone(),
            authorization,
        }
    }
}

/// Authorization request opened in the browser, with the secrets needed to redeem its code
#[derive(Debug)]
pub struct BrowserAuthorization {
    pub url: String,
    pub state: CsrfToken,
    pub verifier: PkceCodeVerifier,
}

#[derive(Debug, Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    client_id: String,
}

impl IdentityClient {
    pub fn new(http: reqwest::Client, client_id: impl Into<String>) -> Self {
        Self {
            http,
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn oauth_client(&self, authority: &Authority) -> Result<AuthorityClient, AuthError> {
        Ok(oauth2::Client::new(ClientId::new(self.client_id.clone()))
            .set_auth_type(AuthType::RequestBody)
            .set_auth_uri(AuthUrl::new(authority.authorize_endpoint()).map_err(invalid_endpoint)?)
            .set_device_authorization_url(
                DeviceAuthorizationUrl::new(authority.device_code_endpoint()).map_err(invalid_endpoint)?,
            )
            .set_token_uri(TokenUrl::new(authority.token_endpoint()).map_err(invalid_endpoint)?))
    }

    pub async fn request_device_code(&self, authority: &Authority, scope: &str) -> Result<DeviceCodeResponse, AuthError> {
        let client = self.oauth_client(authority)?;
        debug!("POST {} (device authorization)", authority.device_code_endpoint());

        let result: Result<DeviceAuthorizationResponse<DeviceCodeMessage>, _> = client
            .exchange_device_code()
            .add_scopes(oidc_scopes(scope))
            .request_async(&self.http)
            .await;

        match result {
            Ok(authorization) => Ok(DeviceCodeResponse::from(authorization)),
            Err(e) => {
                let (error, description) = server_error(e)?;
                Err(AuthError::Identity { error, description })
            }
        }
    }

    /// Poll the token endpoint until the user finishes the device code sign-in
    pub async fn poll_device_code(&self, authority: &Authority, device_code: &DeviceCodeResponse) -> Result<TokenResponse, AuthError> {
        let client = self.oauth_client(authority)?;
        debug!("Polling {} every {}s for the device code", authority.token_endpoint(), device_code.interval);

        client
            .exchange_device_access_token(&device_code.authorization)
            .request_async(&self.http, tokio::time::sleep, None)
            .await
            .map(TokenResponse::from)
            .map_err(device_code_error)
    }

    /// Resource owner password credentials grant
    pub async fn username_password(
        &self,
        authority: &Authority,
        scope: &str,
        username: &str,
        password: &str,
    ) -> Result<TokenResponse, AuthError> {
        let client = self.oauth_client(authority)?;
        debug!("POST {} (password)", authority.token_endpoint());

        let result = client
            .exchange_password(
                &ResourceOwnerUsername::new(username.to_string()),
                &ResourceOwnerPassword::new(password.to_string()),
            )
            .add_scopes(oidc_scopes(scope))
            .request_async(&self.http)
            .await;

        match result {
            Ok(response) => Ok(response.into()),
            Err(e) => Err(credentials_error(server_error(e)?)),
        }
    }

    /// Client credentials grant for a service principal; only the `.default` scope is requested
    pub async fn client_credentials(
        &self,
        authority: &Authority,
        scope: &str,
        client_secret: &str,
    ) -> Result<TokenResponse, AuthError> {
        let client = self
            .oauth_client(authority)?
            .set_client_secret(ClientSecret::new(client_secret.to_string()));
        debug!("POST {} (client_credentials)", authority.token_endpoint());

        let result = client
            .exchange_client_credentials()
            .add_scope(Scope::new(scope.to_string()))
            .request_async(&self.http)
            .await;

        match result {
            Ok(response) => Ok(response.into()),
            Err(e) => Err(credentials_error(server_error(e)?)),
        }
    }

    /// Build the authorize URL with a fresh PKCE challenge and CSRF state
    pub fn authorize_url(
        &self,
        authority: &Authority,
        scope: &str,
        redirect_uri: &str,
        login_hint: Option<&str>,
    ) -> Result<BrowserAuthorization, AuthError> {
        let client = self
            .oauth_client(authority)?
            .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string()).map_err(invalid_endpoint)?);
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(oidc_scopes(scope))
            .set_pkce_challenge(challenge)
            .add_extra_param("response_mode", "query")
            .add_extra_param("prompt", "select_account");
        if let Some(hint) = login_hint {
            request = request.add_extra_param("login_hint", hint.to_string());
        }

        let (url, state) = request.url();
        Ok(BrowserAuthorization {
            url: url.to_string(),
            state,
            verifier,
        })
    }

    /// Authorization code + PKCE redemption
    pub async fn exchange_code(
        &self,
        authority: &Authority,
        scope: &str,
        code: &str,
        verifier: PkceCodeVerifier,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AuthError> {
        let client = self
            .oauth_client(authority)?
            .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string()).map_err(invalid_endpoint)?);
        debug!("POST {} (authorization_code)", authority.token_endpoint());

        let result = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(verifier)
            .add_extra_param("scope", scope_string(scope))
            .request_async(&self.http)
            .await;

        match result {
            Ok(response) => Ok(response.into()),
            Err(e) => {
                let (error, description) = server_error(e)?;
                Err(match error.as_str() {
                    "interaction_required" | "consent_required" => AuthError::InteractionRequired(description),
                    _ => AuthError::Identity { error, description },
                })
            }
        }
    }

    /// Refresh token grant, the network half of silent acquisition
    pub async fn refresh(&self, authority: &Authority, scope: &str, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let client = self.oauth_client(authority)?;
        debug!("POST {} (refresh_token)", authority.token_endpoint());

        let result = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .add_scopes(oidc_scopes(scope))
            .request_async(&self.http)
            .await;

        match result {
            Ok(response) => Ok(response.into()),
            Err(e) => {
                let (error, description) = server_error(e)?;
                Err(AuthError::SilentAuthFailed {
                    scope: scope.to_string(),
                    message: format!("{}: {}", error, description),
                })
            }
        }
    }
}

fn oidc_scopes(scope: &str) -> Vec<Scope> {
    std::iter::once(scope)
        .chain(OIDC_SCOPES)
        .map(|scope| Scope::new(scope.to_string()))
        .collect()
}

fn scope_string(scope: &str) -> String {
    oidc_scopes(scope)
        .iter()
        .map(|scope| scope.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn invalid_endpoint(e: impl std::fmt::Display) -> AuthError {
    AuthError::Identity {
        error: "invalid_endpoint".to_string(),
        description: e.to_string(),
    }
}

/// Split a failed grant into the identity platform's `(error, description)` pair.
/// Transport failures stay errors.
fn server_error<T>(error: GrantError<T>) -> Result<(String, String), AuthError>
where
    T: ErrorResponseType + std::fmt::Display + 'static,
{
    match error {
        RequestTokenError::ServerResponse(response) => Ok((
            response.error().to_string(),
            response.error_description().cloned().unwrap_or_default(),
        )),
        RequestTokenError::Parse(e, body) => Ok((
            "invalid_response".to_string(),
            format!("{} ({})", String::from_utf8_lossy(&body), e),
        )),
        RequestTokenError::Other(message) => Ok(("invalid_response".to_string(), message)),
        RequestTokenError::Request(HttpClientError::Reqwest(e)) => Err(AuthError::Transport(*e)),
        RequestTokenError::Request(e) => Err(AuthError::Identity {
            error: "request_failed".to_string(),
            description: e.to_string(),
        }),
    }
}

fn credentials_error((error, description): (String, String)) -> AuthError {
    match error.as_str() {
        "interaction_required" => AuthError::InteractionRequired(description),
        "invalid_grant" | "invalid_client" | "unauthorized_client" | "invalid_request" => {
            AuthError::InvalidCredentials(format!("{}: {}", error, description))
        }
        _ => AuthError::Identity { error, description },
    }
}

fn device_code_error(error: GrantError<DeviceCodeErrorResponseType>) -> AuthError {
    match server_error(error) {
        Ok((error, description)) => match error.as_str() {
            "expired_token" | "code_expired" => AuthError::DeviceCodeExpired,
            "authorization_declined" | "access_denied" => AuthError::UserCancelled(description),
            _ => AuthError::Identity { error, description },
        },
        Err(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oauth2::basic::BasicErrorResponseType;

    #[test]
    fn test_oidc_scopes_are_appended() {
        assert_eq!(
            scope_string("https://api.powerplatform.com/.default"),
            "https://api.powerplatform.com/.default offline_access openid profile"
        );
    }

    #[test]
    fn test_server_error_pairs() {
        let rejected: GrantError<BasicErrorResponseType> = RequestTokenError::ServerResponse(StandardErrorResponse::new(
            BasicErrorResponseType::InvalidGrant,
            Some("AADSTS50126".to_string()),
            None,
        ));
        let (error, description) = server_error(rejected).unwrap();
        assert_eq!(error, "invalid_grant");
        assert_eq!(description, "AADSTS50126");

        let empty: GrantError<BasicErrorResponseType> =
            RequestTokenError::Other("server returned empty error response".to_string());
        assert_eq!(server_error(empty).unwrap().0, "invalid_response");
    }

    #[test]
    fn test_device_code_errors() {
        let declined: GrantError<DeviceCodeErrorResponseType> = RequestTokenError::ServerResponse(
            StandardErrorResponse::new(DeviceCodeErrorResponseType::AccessDenied, Some("no".to_string()), None),
        );
        assert!(matches!(device_code_error(declined), AuthError::UserCancelled(msg) if msg == "no"));

        let expired: GrantError<DeviceCodeErrorResponseType> = RequestTokenError::ServerResponse(
            StandardErrorResponse::new(DeviceCodeErrorResponseType::ExpiredToken, None, None),
        );
        assert!(matches!(device_code_error(expired), AuthError::DeviceCodeExpired));
    }

    #[test]
    fn test_device_code_interval_default() {
        let authorization: DeviceAuthorizationResponse<DeviceCodeMessage> = serde_json::from_str(
            r#"{"device_code":"d","user_code":"ABC","verification_uri":"https://microsoft.com/devicelogin","expires_in":900,"message":"Enter ABC"}"#,
        )
        .unwrap();
        let challenge = DeviceCodeResponse::from(authorization);
        assert_eq!(challenge.interval, 5);
        assert_eq!(challenge.user_code, "ABC");
        assert_eq!(challenge.message.as_deref(), Some("Enter ABC"));
    }

    #[test]
    fn test_authorize_url() {
        let identity = IdentityClient::new(reqwest::Client::new(), "client");
        let authority = Authority::new("https://login.microsoftonline.com/", Some("contoso"));
        let authorization = identity
            .authorize_url(
                &authority,
                "https://api.powerplatform.com/.default",
                "http://localhost:1234/",
                Some("admin@contoso.com"),
            )
            .unwrap();

        let url = &authorization.url;
        assert!(url.starts_with("https://login.microsoftonline.com/contoso/oauth2/v2.0/authorize?"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A1234%2F"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("prompt=select_account"));
        assert!(url.contains("login_hint=admin%40contoso.com"));
        assert!(url.contains(&format!("state={}", authorization.state.secret())));
        assert_eq!(authorization.verifier.secret().len(), 43);
    }
}
