use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;
use playlistwiz_auth::{
    AuthConfig, AuthState, CallbackServer, FileStorage, SessionManager, SessionNotice,
};

use crate::AppConfig;

#[derive(Subcommand)]
pub enum AuthAction {
    /// Log in via the provider's consent page.
    Login,
    /// Show session status.
    Status,
    /// Log out and clear stored credentials.
    Logout,
}

pub async fn handle_auth(config: &AppConfig, action: AuthAction) -> Result<()> {
    match action {
        AuthAction::Login => login(config).await,
        AuthAction::Status => status(config).await,
        AuthAction::Logout => logout(config).await,
    }
}

/// Session manager over the on-disk credential store. The redirect target
/// is computed from the configured callback port, never hardcoded.
pub fn session_manager(config: &AppConfig) -> Result<Arc<SessionManager>> {
    let storage = Arc::new(FileStorage::new(FileStorage::default_path()?));
    let redirect_uri = format!("http://127.0.0.1:{}/callback", config.callback_port);
    let auth_config = AuthConfig::spotify(config.client_id.clone(), redirect_uri);
    Ok(Arc::new(SessionManager::new(auth_config, storage)?))
}

async fn login(config: &AppConfig) -> Result<()> {
    let manager = session_manager(config)?;
    let request = manager.login_url()?;

    println!("Opening browser for authentication...");
    if open::that(&request.url).is_err() {
        println!("Could not open browser. Please visit:\n{}", request.url);
    }

    println!(
        "Waiting for callback on http://127.0.0.1:{}/callback ...",
        config.callback_port
    );
    let params = CallbackServer::wait_for_params(config.callback_port).await?;

    println!("Exchanging code for tokens...");
    manager.complete_login(&params).await?;

    println!("Successfully connected your streaming account.");
    Ok(())
}

async fn status(config: &AppConfig) -> Result<()> {
    let manager = session_manager(config)?;
    let mut notices = manager.subscribe();

    match manager.check_auth().await {
        AuthState::Authenticated => {
            let remaining = manager
                .expires_at_ms()
                .map_or("unknown".to_string(), format_remaining);
            println!("Logged in [{remaining}]");
        },
        AuthState::Unauthenticated => {
            println!("Not logged in. Run `playlistwiz auth login` to connect.");
        },
    }

    while let Ok(notice) = notices.try_recv() {
        if notice == SessionNotice::SessionExpired {
            println!("Your session expired and could not be refreshed.");
        }
    }
    Ok(())
}

async fn logout(config: &AppConfig) -> Result<()> {
    let manager = session_manager(config)?;
    manager.logout().await;
    println!("Logged out.");
    Ok(())
}

fn format_remaining(expires_at_ms: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    if expires_at_ms <= now {
        return "expired".to_string();
    }
    let remaining_secs = (expires_at_ms - now) / 1000;
    let hours = remaining_secs / 3600;
    let mins = (remaining_secs % 3600) / 60;
    format!("valid ({hours}h {mins}m remaining)")
}
