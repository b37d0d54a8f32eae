//! Loopback HTTP server for the authorization callback redirect.

use std::{
    future::IntoFuture,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use axum::{
    Router,
    extract::{Query, State},
    response::Html,
    routing::get,
};
use tokio::{net::TcpListener, sync::oneshot};
use tracing::info;

use crate::types::CallbackParams;

/// How long to wait for the browser redirect before giving up.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

const SUCCESS_PAGE: &str =
    "<html><body><h2>Authentication complete.</h2><p>You can close this tab and return to playlistwiz.</p></body></html>";
const FAILURE_PAGE: &str =
    "<html><body><h2>Authentication failed.</h2><p>No authorization code was received. Return to playlistwiz and try again.</p></body></html>";

type CallbackTx = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// One-shot server for the provider's redirect back to this client.
///
/// Captures the `code`/`state`/`error` query parameters from the first
/// request to `/callback`; validation of the parameters stays with
/// [`crate::AuthFlow::exchange`].
pub struct CallbackServer;

impl CallbackServer {
    /// Listen on `127.0.0.1:<port>/callback` and return the first redirect.
    pub async fn wait_for_params(port: u16) -> anyhow::Result<CallbackParams> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("could not bind callback server on port {port}"))?;
        Self::wait_on(listener).await
    }

    /// Same as [`Self::wait_for_params`] with a caller-supplied listener.
    pub async fn wait_on(listener: TcpListener) -> anyhow::Result<CallbackParams> {
        let addr = listener.local_addr()?;
        let (tx, rx) = oneshot::channel();
        let tx: CallbackTx = Arc::new(Mutex::new(Some(tx)));

        let app = Router::new()
            .route("/callback", get(handle_callback))
            .with_state(tx);

        info!(%addr, "waiting for authorization callback");
        tokio::select! {
            result = axum::serve(listener, app).into_future() => {
                result.context("callback server failed")?;
                anyhow::bail!("callback server exited before a redirect arrived");
            },
            params = rx => params.context("callback channel closed"),
            _ = tokio::time::sleep(CALLBACK_TIMEOUT) => {
                anyhow::bail!("timed out waiting for the browser redirect");
            },
        }
    }
}

async fn handle_callback(
    State(tx): State<CallbackTx>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let page = if params.code.is_some() {
        SUCCESS_PAGE
    } else {
        FAILURE_PAGE
    };
    let sender = match tx.lock() {
        Ok(mut slot) => slot.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(sender) = sender {
        let _ = sender.send(params);
    }
    Html(page)
}
