//! Session lifecycle: startup check, proactive refresh, logout.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use secrecy::SecretString;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

use crate::{
    error::AuthError,
    flow::AuthFlow,
    storage::{PkceStore, StorageBackend, TokenStore},
    types::{AuthConfig, AuthorizeRequest, CallbackParams},
};

/// Refresh proactively this long before the stored expiry, so an expired
/// token is never handed to a caller.
const REFRESH_SKEW_MS: u64 = 5 * 60 * 1000;

/// Observable session states. A transient refresh happens inside
/// [`SessionManager::check_auth`] and is not separately observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Authenticated,
    Unauthenticated,
}

/// Derived, in-memory projection of the stored credentials.
///
/// `loading` is true only until the first `check_auth` resolves; it reaches
/// false exactly once per manager, regardless of outcome.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub token: Option<SecretString>,
    pub authenticated: bool,
    pub loading: bool,
}

/// Out-of-band notices for the front end (the toast collaborator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    SessionExpired,
    AuthenticationFailed(String),
    LoggedOut,
}

/// Owns the credential stores and decides whether the session is valid,
/// refreshable, or gone. The only writer of token/PKCE storage at runtime.
pub struct SessionManager {
    flow: AuthFlow,
    tokens: TokenStore,
    pkce: PkceStore,
    snapshot: RwLock<SessionSnapshot>,
    /// Serializes check/refresh so concurrent callers share one outcome
    /// instead of racing two refresh requests into the store.
    guard: Mutex<()>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionManager {
    pub fn new(config: AuthConfig, backend: Arc<dyn StorageBackend>) -> anyhow::Result<Self> {
        let tokens = TokenStore::new(backend.clone());
        let pkce = PkceStore::new(backend);
        let flow = AuthFlow::new(config, pkce.clone())?;
        let (notices, _) = broadcast::channel(16);
        Ok(Self {
            flow,
            tokens,
            pkce,
            snapshot: RwLock::new(SessionSnapshot {
                token: None,
                authenticated: false,
                loading: true,
            }),
            guard: Mutex::new(()),
            notices,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Start a login attempt: fresh PKCE pair, persisted, URL returned.
    pub fn login_url(&self) -> Result<AuthorizeRequest, AuthError> {
        self.flow.authorize_url()
    }

    /// Finish a login attempt from the callback parameters.
    ///
    /// On success the full token record is persisted and the session
    /// becomes authenticated; on any failure the session stays fully
    /// logged out and a notice is emitted for the retry affordance.
    pub async fn complete_login(&self, params: &CallbackParams) -> Result<(), AuthError> {
        let _guard = self.guard.lock().await;
        match self.flow.exchange(params).await {
            Ok(tokens) => {
                let expires_at_ms = now_ms() + tokens.expires_in * 1000;
                self.tokens
                    .save(
                        &tokens.access_token,
                        tokens.refresh_token.as_deref(),
                        expires_at_ms,
                    )
                    .map_err(AuthError::Storage)?;
                self.set_snapshot(Some(tokens.access_token)).await;
                info!("login complete");
                Ok(())
            },
            Err(err) => {
                warn!(error = %err, "login failed");
                self.set_snapshot(None).await;
                let _ = self
                    .notices
                    .send(SessionNotice::AuthenticationFailed(err.to_string()));
                Err(err)
            },
        }
    }

    /// The startup/on-demand transition procedure.
    ///
    /// Reads the store, refreshes proactively inside the expiry skew when a
    /// refresh token exists, and clears everything on terminal failure.
    /// `loading` resolves only after any awaited refresh completes.
    pub async fn check_auth(&self) -> AuthState {
        let _guard = self.guard.lock().await;
        let token = self.evaluate().await;
        let state = if token.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        };
        self.set_snapshot(token).await;
        state
    }

    async fn evaluate(&self) -> Option<String> {
        let stored = match self.tokens.load() {
            Ok(stored) => stored?,
            Err(e) => {
                warn!(error = %e, "could not read token store");
                return None;
            },
        };

        let near_expiry = now_ms() > stored.expires_at_ms.saturating_sub(REFRESH_SKEW_MS);
        if !near_expiry {
            return Some(stored.access_token);
        }

        match stored.refresh_token {
            Some(refresh_token) => self.run_refresh(&refresh_token).await,
            None => {
                debug!("token near expiry with no refresh token");
                self.expire_session();
                None
            },
        }
    }

    /// Caller-initiated refresh, for collaborators that hit an unauthorized
    /// response mid-use. Returns whether a usable token is now stored.
    pub async fn refresh_now(&self) -> bool {
        let _guard = self.guard.lock().await;
        let stored = match self.tokens.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "could not read token store");
                return false;
            },
        };
        let Some(refresh_token) = stored.refresh_token else {
            return false;
        };
        let token = self.run_refresh(&refresh_token).await;
        let authenticated = token.is_some();
        self.set_snapshot(token).await;
        authenticated
    }

    async fn run_refresh(&self, refresh_token: &str) -> Option<String> {
        match self.flow.refresh(refresh_token).await {
            Ok(tokens) => {
                let expires_at_ms = now_ms() + tokens.expires_in * 1000;
                if let Err(e) = self.tokens.update_access(
                    &tokens.access_token,
                    expires_at_ms,
                    tokens.refresh_token.as_deref(),
                ) {
                    warn!(error = %e, "could not persist refreshed token");
                    return None;
                }
                info!(rotated = tokens.refresh_token.is_some(), "access token refreshed");
                Some(tokens.access_token)
            },
            Err(err) => {
                // A stale credential is equally unusable whether the
                // endpoint rejected it or the network failed; the
                // distinction is only logged.
                match &err {
                    AuthError::Network(_) => warn!(error = %err, "refresh network failure"),
                    _ => warn!(error = %err, "refresh rejected"),
                }
                self.expire_session();
                None
            },
        }
    }

    /// Clear everything and require a fresh login.
    pub async fn logout(&self) {
        let _guard = self.guard.lock().await;
        self.clear_stores();
        self.set_snapshot(None).await;
        let _ = self.notices.send(SessionNotice::LoggedOut);
        info!("logged out");
    }

    /// Bearer credential for API collaborators, validated (and refreshed)
    /// on the way out. `None` means the caller must send the user to login.
    pub async fn bearer_token(&self) -> Option<SecretString> {
        match self.check_auth().await {
            AuthState::Authenticated => self.snapshot.read().await.token.clone(),
            AuthState::Unauthenticated => None,
        }
    }

    /// Stored expiry, for status display.
    pub fn expires_at_ms(&self) -> Option<u64> {
        self.tokens.load().ok().flatten().map(|t| t.expires_at_ms)
    }

    fn expire_session(&self) {
        self.clear_stores();
        let _ = self.notices.send(SessionNotice::SessionExpired);
    }

    fn clear_stores(&self) {
        if let Err(e) = self.tokens.clear() {
            warn!(error = %e, "could not clear token store");
        }
        if let Err(e) = self.pkce.clear() {
            warn!(error = %e, "could not clear PKCE values");
        }
    }

    async fn set_snapshot(&self, token: Option<String>) {
        let mut snapshot = self.snapshot.write().await;
        snapshot.authenticated = token.is_some();
        snapshot.token = token.map(SecretString::new);
        snapshot.loading = false;
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;
    use crate::storage::MemoryStorage;

    fn manager_against(server: &mockito::ServerGuard) -> (SessionManager, Arc<MemoryStorage>) {
        let backend = Arc::new(MemoryStorage::new());
        let config = AuthConfig {
            client_id: "client-1".to_string(),
            auth_url: "https://accounts.example.com/authorize".to_string(),
            token_url: format!("{}/api/token", server.url()),
            redirect_uri: "http://127.0.0.1:8080/callback".to_string(),
            scopes: vec!["playlist-read-private".to_string()],
        };
        let manager = SessionManager::new(config, backend.clone()).unwrap();
        (manager, backend)
    }

    fn seed_tokens(
        backend: &MemoryStorage,
        access: &str,
        refresh: Option<&str>,
        expires_at_ms: u64,
    ) {
        backend.set("token", access).unwrap();
        backend.set("token_expiration", &expires_at_ms.to_string()).unwrap();
        if let Some(rt) = refresh {
            backend.set("refresh_token", rt).unwrap();
        }
    }

    #[tokio::test]
    async fn test_no_stored_token_is_unauthenticated_without_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/token")
            .expect(0)
            .create_async()
            .await;
        let (manager, _) = manager_against(&server);

        assert!(manager.snapshot().await.loading);
        assert_eq!(manager.check_auth().await, AuthState::Unauthenticated);

        let snapshot = manager.snapshot().await;
        assert!(!snapshot.loading);
        assert!(!snapshot.authenticated);
        assert!(snapshot.token.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_valid_token_skips_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/token")
            .expect(0)
            .create_async()
            .await;
        let (manager, backend) = manager_against(&server);
        seed_tokens(&backend, "AT1", Some("RT1"), now_ms() + 10 * 60 * 1000);

        assert_eq!(manager.check_auth().await, AuthState::Authenticated);
        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.token.unwrap().expose_secret(), "AT1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_near_expiry_refreshes_successfully() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(r#"{"access_token":"AT2","expires_in":3600}"#)
            .create_async()
            .await;
        let (manager, backend) = manager_against(&server);
        seed_tokens(&backend, "AT1", Some("RT1"), now_ms() + 2 * 60 * 1000);

        assert_eq!(manager.check_auth().await, AuthState::Authenticated);
        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.token.unwrap().expose_secret(), "AT2");
        // Refresh token is kept when the provider does not rotate it.
        assert_eq!(backend.get("refresh_token").unwrap().as_deref(), Some("RT1"));
        assert_eq!(backend.get("token").unwrap().as_deref(), Some("AT2"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_everything() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;
        let (manager, backend) = manager_against(&server);
        seed_tokens(&backend, "AT1", Some("RT1"), now_ms() + 2 * 60 * 1000);
        let mut notices = manager.subscribe();

        assert_eq!(manager.check_auth().await, AuthState::Unauthenticated);
        assert_eq!(backend.get("token").unwrap(), None);
        assert_eq!(backend.get("token_expiration").unwrap(), None);
        assert_eq!(backend.get("refresh_token").unwrap(), None);
        assert_eq!(notices.try_recv().unwrap(), SessionNotice::SessionExpired);
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token_clears_without_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/token")
            .expect(0)
            .create_async()
            .await;
        let (manager, backend) = manager_against(&server);
        seed_tokens(&backend, "AT1", None, now_ms().saturating_sub(1000));
        let mut notices = manager.subscribe();

        assert_eq!(manager.check_auth().await, AuthState::Unauthenticated);
        assert_eq!(backend.get("token").unwrap(), None);
        assert_eq!(backend.get("token_expiration").unwrap(), None);
        assert_eq!(notices.try_recv().unwrap(), SessionNotice::SessionExpired);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_checks_share_one_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(r#"{"access_token":"AT2","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;
        let (manager, backend) = manager_against(&server);
        seed_tokens(&backend, "AT1", Some("RT1"), now_ms() + 2 * 60 * 1000);

        let (first, second) = tokio::join!(manager.check_auth(), manager.check_auth());
        assert_eq!(first, AuthState::Authenticated);
        assert_eq!(second, AuthState::Authenticated);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_persisted() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(r#"{"access_token":"AT2","refresh_token":"RT2","expires_in":3600}"#)
            .create_async()
            .await;
        let (manager, backend) = manager_against(&server);
        seed_tokens(&backend, "AT1", Some("RT1"), now_ms() + 60 * 1000);

        assert_eq!(manager.check_auth().await, AuthState::Authenticated);
        assert_eq!(backend.get("refresh_token").unwrap().as_deref(), Some("RT2"));
    }

    #[tokio::test]
    async fn test_full_login_round_trip() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(r#"{"access_token":"AT1","refresh_token":"RT1","expires_in":3600}"#)
            .create_async()
            .await;
        let (manager, backend) = manager_against(&server);

        let req = manager.login_url().unwrap();
        let before = now_ms();
        manager
            .complete_login(&CallbackParams {
                code: Some("abc123".to_string()),
                state: Some(req.state),
                error: None,
            })
            .await
            .unwrap();

        assert_eq!(backend.get("token").unwrap().as_deref(), Some("AT1"));
        assert_eq!(backend.get("refresh_token").unwrap().as_deref(), Some("RT1"));
        let expiry: u64 = backend.get("token_expiration").unwrap().unwrap().parse().unwrap();
        assert!(expiry >= before + 3_600_000);
        assert!(expiry <= now_ms() + 3_600_000);
        // PKCE values are consumed by the exchange.
        assert_eq!(backend.get("code_verifier").unwrap(), None);
        assert_eq!(backend.get("state").unwrap(), None);

        let snapshot = manager.snapshot().await;
        assert!(snapshot.authenticated);
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn test_failed_login_leaves_no_half_state() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;
        let (manager, backend) = manager_against(&server);
        let mut notices = manager.subscribe();

        let req = manager.login_url().unwrap();
        let err = manager
            .complete_login(&CallbackParams {
                code: Some("abc123".to_string()),
                state: Some(req.state),
                error: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ExchangeFailed { .. }));
        assert_eq!(backend.get("token").unwrap(), None);
        assert!(!manager.snapshot().await.authenticated);
        assert!(matches!(
            notices.try_recv().unwrap(),
            SessionNotice::AuthenticationFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_logout_clears_and_notifies() {
        let server = mockito::Server::new_async().await;
        let (manager, backend) = manager_against(&server);
        seed_tokens(&backend, "AT1", Some("RT1"), now_ms() + 10 * 60 * 1000);
        backend.set("code_verifier", "leftover").unwrap();
        let mut notices = manager.subscribe();

        manager.logout().await;

        assert_eq!(backend.get("token").unwrap(), None);
        assert_eq!(backend.get("refresh_token").unwrap(), None);
        assert_eq!(backend.get("code_verifier").unwrap(), None);
        assert!(!manager.snapshot().await.authenticated);
        assert_eq!(notices.try_recv().unwrap(), SessionNotice::LoggedOut);
    }

    #[tokio::test]
    async fn test_refresh_now_without_refresh_token() {
        let server = mockito::Server::new_async().await;
        let (manager, backend) = manager_against(&server);
        seed_tokens(&backend, "AT1", None, now_ms() + 10 * 60 * 1000);

        assert!(!manager.refresh_now().await);
        // Not a terminal failure: the stored token is left for check_auth
        // to judge.
        assert_eq!(backend.get("token").unwrap().as_deref(), Some("AT1"));
    }
}
