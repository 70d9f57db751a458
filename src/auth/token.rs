use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::AuthError;

/// Bearer token for one scope. Never mutated; a refresh produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub scope: String,
    pub tenant_id: String,
    pub access_token: String,
    pub expires_on: DateTime<Utc>,
}

impl Token {
    pub fn new(scope: impl Into<String>, tenant_id: impl Into<String>, access_token: impl Into<String>, expires_in_secs: i64) -> Self {
        Self {
            scope: scope.into(),
            tenant_id: tenant_id.into(),
            access_token: access_token.into(),
            expires_on: Utc::now() + Duration::seconds(expires_in_secs),
        }
    }

    /// True when the token expires within `skew`
    pub fn is_expiring(&self, skew: Duration) -> bool {
        self.expires_on - skew <= Utc::now()
    }
}

/// Signed-in account, the key for silent re-acquisition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub tenant_id: String,
    pub preferred_username: String,
    pub home_account_id: String,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    tid: String,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    upn: Option<String>,
}

impl AccountIdentity {
    /// Read the account out of an OpenID Connect id token payload.
    /// The signature is not checked; the token comes straight from the token endpoint over TLS.
    pub fn from_id_token(id_token: &str) -> Result<Self, AuthError> {
        let payload = id_token
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthError::Cache("id token is not a JWT".to_string()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthError::Cache(format!("id token payload is not base64url: {}", e)))?;
        let claims: IdTokenClaims = serde_json::from_slice(&bytes)?;

        let object_id = claims
            .oid
            .or(claims.sub)
            .ok_or_else(|| AuthError::Cache("id token carries no oid or sub claim".to_string()))?;
        let username = claims.preferred_username.or(claims.upn).unwrap_or_default();

        Ok(Self {
            home_account_id: format!("{}.{}", object_id, claims.tid),
            tenant_id: claims.tid,
            preferred_username: username,
        })
    }

    /// Application identity used by client credentials sign-in, which returns no id token
    pub fn service_principal(client_id: &str, tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            preferred_username: client_id.to_string(),
            home_account_id: format!("{}.{}", client_id, tenant_id),
        }
    }
}
