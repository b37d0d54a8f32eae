use serde::{Deserialize, Serialize};

/// OAuth 2.0 provider configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl AuthConfig {
    /// Spotify endpoints with the scope set the playlist features need.
    pub fn spotify(client_id: String, redirect_uri: String) -> Self {
        Self {
            client_id,
            auth_url: "https://accounts.spotify.com/authorize".to_string(),
            token_url: "https://accounts.spotify.com/api/token".to_string(),
            redirect_uri,
            scopes: vec![
                "user-read-private".to_string(),
                "user-read-email".to_string(),
                "playlist-read-private".to_string(),
                "playlist-read-collaborative".to_string(),
                "playlist-modify-public".to_string(),
                "playlist-modify-private".to_string(),
            ],
        }
    }
}

/// PKCE values for a single login attempt.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Random secret, sent only with the code exchange.
    pub verifier: String,
    /// Anti-CSRF correlation token.
    pub state: String,
    /// base64url(SHA-256(verifier)), sent with the authorization request.
    pub challenge: String,
}

/// A fully formed authorization redirect, plus the state it was issued with.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub url: String,
    pub state: String,
}

/// Query parameters delivered to the callback route by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Token endpoint response for both grant types. The refresh grant usually
/// omits `refresh_token`; some providers rotate it, so it stays optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds from issuance.
    pub expires_in: u64,
}

/// Durable credential record as read back from the token store.
#[derive(Debug, Clone)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Absolute expiry, unix milliseconds.
    pub expires_at_ms: u64,
}
