use thiserror::Error;

/// Failure taxonomy for the PKCE login and refresh flows.
///
/// `StateMismatch` and `MissingVerifier` are treated as potential security
/// incidents: callers must terminate the flow and require a fresh login,
/// never retry silently.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The identity provider returned an `error` parameter on the callback.
    #[error("authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    /// The callback carried no authorization code.
    #[error("no authorization code in callback")]
    MissingCode,

    /// No PKCE verifier was stored; the flow was not initiated by this
    /// client or its storage was cleared mid-flight.
    #[error("no stored PKCE verifier for this login attempt")]
    MissingVerifier,

    /// Callback `state` does not match the stored value (possible CSRF).
    #[error("state parameter mismatch")]
    StateMismatch,

    /// The token endpoint rejected the code exchange.
    #[error("code exchange failed (HTTP {status}): {body}")]
    ExchangeFailed { status: u16, body: String },

    /// The token endpoint rejected the refresh request.
    #[error("token refresh failed (HTTP {status}): {body}")]
    RefreshFailed { status: u16, body: String },

    /// Transport-level failure, distinguishable from an HTTP error response.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The local credential store could not be read or written.
    #[error("storage error: {0}")]
    Storage(anyhow::Error),

    /// The configured authorize endpoint is not a valid URL.
    #[error("invalid authorize endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}
