use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no cached account found for tenant '{tenant}'; run `powerplatform-cli login` first")]
    NoCachedAccount { tenant: String },

    #[error("silent token acquisition for scope '{scope}' failed: {message}")]
    SilentAuthFailed { scope: String, message: String },

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("authentication cancelled by user: {0}")]
    UserCancelled(String),

    #[error("interaction required: {0}")]
    InteractionRequired(String),

    #[error("device code expired before the sign-in was completed")]
    DeviceCodeExpired,

    #[error("identity provider returned '{error}': {description}")]
    Identity { error: String, description: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("token cache is not valid JSON: {0}")]
    CacheFormat(#[from] serde_json::Error),

    #[error("token cache error: {0}")]
    Cache(String),

    #[error("identity endpoint request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("authentication cancelled")]
    Cancelled,
}

impl AuthError {
    /// True when the caller must sign in again rather than retry
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            AuthError::NoCachedAccount { .. }
                | AuthError::SilentAuthFailed { .. }
                | AuthError::InteractionRequired(_)
        )
    }
}
