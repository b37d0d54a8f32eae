//! Authorization URL construction plus the two token-endpoint grants.

use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use crate::{
    error::AuthError,
    storage::PkceStore,
    types::{AuthConfig, AuthorizeRequest, CallbackParams, PkceChallenge, TokenResponse},
};

/// Bound on both token-endpoint calls so a stalled network can never hold a
/// session check open indefinitely.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// PKCE authorization-code flow against a single provider.
pub struct AuthFlow {
    config: AuthConfig,
    pkce: PkceStore,
    http: reqwest::Client,
}

impl AuthFlow {
    pub fn new(config: AuthConfig, pkce: PkceStore) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { config, pkce, http })
    }

    /// Build the provider authorize URL for a fresh login attempt.
    ///
    /// Generates a new verifier/state pair and persists it, overwriting any
    /// prior uncommitted attempt: the most recent call wins.
    pub fn authorize_url(&self) -> Result<AuthorizeRequest, AuthError> {
        let pkce = PkceChallenge::generate();
        self.pkce
            .store(&pkce.verifier, &pkce.state)
            .map_err(AuthError::Storage)?;

        let mut url = Url::parse(&self.config.auth_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("code_challenge_method", "S256")
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("state", &pkce.state)
            .append_pair("scope", &self.config.scopes.join(" "));

        debug!(state = %pkce.state, "authorization URL built");
        Ok(AuthorizeRequest {
            url: url.to_string(),
            state: pkce.state,
        })
    }

    /// Trade the callback's authorization code for a token pair.
    ///
    /// Fail-fast ordering: provider `error` first (the PKCE store is never
    /// read), then missing code, then missing verifier, then the state
    /// comparison. Once the state has been checked the stored pair is
    /// cleared no matter how the exchange itself ends.
    pub async fn exchange(&self, params: &CallbackParams) -> Result<TokenResponse, AuthError> {
        if let Some(error) = &params.error {
            return Err(AuthError::AuthorizationDenied(error.clone()));
        }
        let Some(code) = params.code.as_deref() else {
            return Err(AuthError::MissingCode);
        };

        let (verifier, stored_state) = self.pkce.retrieve().map_err(AuthError::Storage)?;
        let Some(verifier) = verifier else {
            // A lone orphaned state value may still be present.
            self.clear_pkce();
            return Err(AuthError::MissingVerifier);
        };

        let state_matches = matches!(
            (params.state.as_deref(), stored_state.as_deref()),
            (Some(received), Some(stored)) if received == stored
        );
        if !state_matches {
            warn!("state mismatch on callback; aborting exchange");
            self.clear_pkce();
            return Err(AuthError::StateMismatch);
        }

        let result = self
            .grant(
                &[
                    ("client_id", self.config.client_id.as_str()),
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", self.config.redirect_uri.as_str()),
                    ("code_verifier", verifier.as_str()),
                ],
                false,
            )
            .await;
        // Consumed exactly once, success or failure.
        self.clear_pkce();
        result
    }

    /// Trade a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        self.grant(
            &[
                ("client_id", self.config.client_id.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
            true,
        )
        .await
    }

    async fn grant(
        &self,
        form: &[(&str, &str)],
        refreshing: bool,
    ) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await
            .map_err(AuthError::Network)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(AuthError::Network)?;
        if !(200..300).contains(&status) {
            return Err(if refreshing {
                AuthError::RefreshFailed { status, body }
            } else {
                AuthError::ExchangeFailed { status, body }
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            let body = format!("malformed token response: {e}");
            if refreshing {
                AuthError::RefreshFailed { status, body }
            } else {
                AuthError::ExchangeFailed { status, body }
            }
        })
    }

    fn clear_pkce(&self) {
        if let Err(e) = self.pkce.clear() {
            warn!(error = %e, "failed to clear PKCE values");
        }
    }
}
