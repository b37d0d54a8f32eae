//! Authenticated client for the streaming API's playlist surface.

use std::{sync::Arc, time::Duration};

use playlistwiz_auth::SessionManager;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::types::{Page, Playlist, PlaylistTrack, SearchResults, SnapshotId, Track, User};

/// Hosted API root; overridable for tests.
pub const API_BASE: &str = "https://api.spotify.com/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CatalogError {
    /// No usable session; the caller must send the user to login.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The API returned a non-success response.
    #[error("catalog request failed (HTTP {status}): {body}")]
    RequestFailed { status: u16, body: String },

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
}

/// Thin fetch layer over the remote catalog. Holds no catalog state of its
/// own; tokens come from the session manager on every call.
pub struct CatalogClient {
    session: Arc<SessionManager>,
    base_url: String,
    http: reqwest::Client,
}

impl CatalogClient {
    pub fn new(session: Arc<SessionManager>) -> Result<Self, CatalogError> {
        Self::with_base_url(session, API_BASE.to_string())
    }

    pub fn with_base_url(
        session: Arc<SessionManager>,
        base_url: String,
    ) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(CatalogError::Network)?;
        Ok(Self {
            session,
            base_url,
            http,
        })
    }

    /// Profile of the session owner.
    pub async fn me(&self) -> Result<User, CatalogError> {
        self.request(Method::GET, "/me", &[], None).await
    }

    /// The session owner's playlists.
    pub async fn playlists(&self) -> Result<Page<Playlist>, CatalogError> {
        self.request(Method::GET, "/me/playlists", &[], None).await
    }

    /// One playlist, including its track page.
    pub async fn playlist(&self, playlist_id: &str) -> Result<Playlist, CatalogError> {
        self.request(Method::GET, &format!("/playlists/{playlist_id}"), &[], None)
            .await
    }

    /// Track entries of a playlist.
    pub async fn playlist_tracks(
        &self,
        playlist_id: &str,
    ) -> Result<Page<PlaylistTrack>, CatalogError> {
        self.request(
            Method::GET,
            &format!("/playlists/{playlist_id}/tracks"),
            &[],
            None,
        )
        .await
    }

    /// Several tracks by id.
    pub async fn tracks(&self, track_ids: &[String]) -> Result<Vec<Track>, CatalogError> {
        #[derive(serde::Deserialize)]
        struct Tracks {
            tracks: Vec<Track>,
        }
        let wrapper: Tracks = self
            .request(
                Method::GET,
                "/tracks",
                &[("ids", track_ids.join(","))],
                None,
            )
            .await?;
        Ok(wrapper.tracks)
    }

    /// Search the catalog for tracks, albums, and/or artists.
    pub async fn search(
        &self,
        query: &str,
        types: &[&str],
    ) -> Result<SearchResults, CatalogError> {
        self.request(
            Method::GET,
            "/search",
            &[("q", query.to_string()), ("type", types.join(","))],
            None,
        )
        .await
    }

    /// Create an empty playlist owned by `user_id`.
    pub async fn create_playlist(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Playlist, CatalogError> {
        self.request(
            Method::POST,
            &format!("/users/{user_id}/playlists"),
            &[],
            Some(json!({ "name": name, "description": description, "public": false })),
        )
        .await
    }

    /// Append tracks (by URI) to a playlist.
    pub async fn add_tracks(
        &self,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<SnapshotId, CatalogError> {
        self.request(
            Method::POST,
            &format!("/playlists/{playlist_id}/tracks"),
            &[],
            Some(json!({ "uris": uris })),
        )
        .await
    }

    /// Remove every occurrence of the given tracks from a playlist.
    pub async fn remove_tracks(
        &self,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<SnapshotId, CatalogError> {
        let tracks: Vec<Value> = uris.iter().map(|uri| json!({ "uri": uri })).collect();
        self.request(
            Method::DELETE,
            &format!("/playlists/{playlist_id}/tracks"),
            &[],
            Some(json!({ "tracks": tracks })),
        )
        .await
    }

    /// Move the track at `range_start` so it sits before `insert_before`.
    pub async fn reorder_tracks(
        &self,
        playlist_id: &str,
        range_start: u32,
        insert_before: u32,
    ) -> Result<SnapshotId, CatalogError> {
        self.request(
            Method::PUT,
            &format!("/playlists/{playlist_id}/tracks"),
            &[],
            Some(json!({ "range_start": range_start, "insert_before": insert_before })),
        )
        .await
    }

    /// Issue a request with the current bearer token. An unauthorized
    /// response triggers one refresh attempt and one retry before failing;
    /// it never logs the user out directly.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T, CatalogError> {
        let token = self
            .session
            .bearer_token()
            .await
            .ok_or(CatalogError::NotAuthenticated)?;

        let response = self
            .send(method.clone(), path, query, body.as_ref(), &token)
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            debug!(path, "unauthorized response; refreshing before giving up");
            if self.session.refresh_now().await {
                let token = self
                    .session
                    .bearer_token()
                    .await
                    .ok_or(CatalogError::NotAuthenticated)?;
                let retried = self.send(method, path, query, body.as_ref(), &token).await?;
                return decode(retried).await;
            }
        }
        decode(response).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        token: &SecretString,
    ) -> Result<reqwest::Response, CatalogError> {
        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header(
                "Authorization",
                format!("Bearer {}", token.expose_secret()),
            );
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await.map_err(CatalogError::Network)
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, CatalogError> {
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.text().await.map_err(CatalogError::Network)?;
        return Err(CatalogError::RequestFailed { status, body });
    }
    response.json().await.map_err(CatalogError::Network)
}
