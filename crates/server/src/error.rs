use thiserror::Error;

/// Errors raised while issuing or verifying tokens.
///
/// The OAuth2-facing layer maps these onto protocol error codes; the core only
/// guarantees that no token is returned when any of them occurs.
#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("Missing required configuration: {0}")]
    ConfigMissing(&'static str),
    #[error("Signing key unavailable: {0}")]
    KeyUnavailable(String),
    #[error("Identity service error: {0}")]
    IdentityService(String),
    #[error("Scope denied: {0}")]
    ScopeDenied(String),
    #[error("Unsupported signing method: {0}")]
    UnsupportedSigningMethod(String),
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),
}

impl IssuanceError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            IssuanceError::ConfigMissing(_) => "config_missing",
            IssuanceError::KeyUnavailable(_) => "key_unavailable",
            IssuanceError::IdentityService(_) => "identity_service",
            IssuanceError::ScopeDenied(_) => "scope_denied",
            IssuanceError::UnsupportedSigningMethod(_) => "unsupported_signing_method",
            IssuanceError::TokenExpired => "token_expired",
            IssuanceError::InvalidToken(_) => "invalid_token",
            IssuanceError::Signing(_) => "signing",
            IssuanceError::DeadlineExceeded(_) => "deadline_exceeded",
        }
    }
}

impl From<sea_orm::DbErr> for IssuanceError {
    fn from(e: sea_orm::DbErr) -> Self {
        IssuanceError::IdentityService(format!("database: {e}"))
    }
}

impl From<RemoteError> for IssuanceError {
    fn from(e: RemoteError) -> Self {
        IssuanceError::IdentityService(e.to_string())
    }
}

/// Failures talking to a remote HTTP/GraphQL collaborator.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Network timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP status {status}: {context}")]
    Http {
        status: hyper::StatusCode,
        context: String,
    },
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),
    #[error("GraphQL error: {0}")]
    GraphQl(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid form body: {0}")]
    InvalidForm(String),
}

pub type Result<T, E = IssuanceError> = std::result::Result<T, E>;
