use anyhow::{Context, Result};
use clap::Subcommand;
use playlistwiz_catalog::{CatalogClient, CatalogError, Playlist, Track};

use crate::{AppConfig, auth_commands};

#[derive(Subcommand)]
pub enum PlaylistAction {
    /// List your playlists.
    List,
    /// Show one playlist with its tracks.
    Show {
        /// Playlist id.
        id: String,
    },
    /// Create an empty playlist.
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Append tracks to a playlist.
    AddTracks {
        /// Playlist id.
        id: String,
        /// Track URIs to append.
        uris: Vec<String>,
    },
    /// Remove tracks from a playlist.
    RemoveTracks {
        /// Playlist id.
        id: String,
        /// Track URIs to remove.
        uris: Vec<String>,
    },
    /// Move a track to a new position.
    Reorder {
        /// Playlist id.
        id: String,
        /// Current position of the track (zero-based).
        #[arg(long)]
        from: u32,
        /// Position the track should be inserted before.
        #[arg(long)]
        to: u32,
    },
}

fn catalog_client(config: &AppConfig) -> Result<CatalogClient> {
    let session = auth_commands::session_manager(config)?;
    CatalogClient::new(session).context("could not build catalog client")
}

pub async fn handle_playlists(config: &AppConfig, action: PlaylistAction) -> Result<()> {
    let client = catalog_client(config)?;
    let result = match action {
        PlaylistAction::List => list(&client).await,
        PlaylistAction::Show { id } => show(&client, &id).await,
        PlaylistAction::Create { name, description } => {
            create(&client, &name, &description).await
        },
        PlaylistAction::AddTracks { id, uris } => add_tracks(&client, &id, &uris).await,
        PlaylistAction::RemoveTracks { id, uris } => remove_tracks(&client, &id, &uris).await,
        PlaylistAction::Reorder { id, from, to } => reorder(&client, &id, from, to).await,
    };
    finish(result)
}

pub async fn handle_search(config: &AppConfig, query: &str, types: &str) -> Result<()> {
    let client = catalog_client(config)?;
    let types: Vec<&str> = types.split(',').map(str::trim).collect();
    let result = async {
        let results = client.search(query, &types).await?;
        if let Some(tracks) = results.tracks {
            println!("Tracks ({}):", tracks.total);
            for track in &tracks.items {
                println!("  {}", describe_track(track));
            }
        }
        if let Some(albums) = results.albums {
            println!("Albums ({}):", albums.total);
            for album in &albums.items {
                println!("  {} [{}]", album.name, album.id);
            }
        }
        if let Some(artists) = results.artists {
            println!("Artists ({}):", artists.total);
            for artist in &artists.items {
                println!("  {} [{}]", artist.name, artist.id);
            }
        }
        Ok(())
    }
    .await;
    finish(result)
}

async fn list(client: &CatalogClient) -> Result<(), CatalogError> {
    let page = client.playlists().await?;
    if page.items.is_empty() {
        println!("No playlists found.");
        return Ok(());
    }
    for playlist in &page.items {
        println!("{}", describe_playlist(playlist));
    }
    Ok(())
}

async fn show(client: &CatalogClient, id: &str) -> Result<(), CatalogError> {
    let playlist = client.playlist(id).await?;
    println!("{}", describe_playlist(&playlist));
    if !playlist.description.is_empty() {
        println!("{}", playlist.description);
    }
    let tracks = match playlist.tracks {
        Some(tracks) if !tracks.items.is_empty() => tracks,
        _ => client.playlist_tracks(id).await?,
    };
    for (index, entry) in tracks.items.iter().enumerate() {
        println!("  {:>3}. {}", index + 1, describe_track(&entry.track));
    }
    Ok(())
}

async fn create(
    client: &CatalogClient,
    name: &str,
    description: &str,
) -> Result<(), CatalogError> {
    let me = client.me().await?;
    let playlist = client.create_playlist(&me.id, name, description).await?;
    println!("Created playlist '{}' [{}]", playlist.name, playlist.id);
    Ok(())
}

async fn add_tracks(
    client: &CatalogClient,
    id: &str,
    uris: &[String],
) -> Result<(), CatalogError> {
    let snapshot = client.add_tracks(id, uris).await?;
    println!("Added {} track(s) [{}]", uris.len(), snapshot.snapshot_id);
    Ok(())
}

async fn remove_tracks(
    client: &CatalogClient,
    id: &str,
    uris: &[String],
) -> Result<(), CatalogError> {
    let snapshot = client.remove_tracks(id, uris).await?;
    println!("Removed {} track(s) [{}]", uris.len(), snapshot.snapshot_id);
    Ok(())
}

async fn reorder(
    client: &CatalogClient,
    id: &str,
    from: u32,
    to: u32,
) -> Result<(), CatalogError> {
    let snapshot = client.reorder_tracks(id, from, to).await?;
    println!(
        "Moved track {from} before position {to} [{}]",
        snapshot.snapshot_id
    );
    Ok(())
}

/// Map the unauthenticated failure to a login hint instead of a bare error.
fn finish(result: Result<(), CatalogError>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(CatalogError::NotAuthenticated) => {
            println!("Not logged in. Run `playlistwiz auth login` to connect.");
            Ok(())
        },
        Err(err) => Err(err.into()),
    }
}

fn describe_playlist(playlist: &Playlist) -> String {
    let total = playlist.tracks.as_ref().map_or(0, |t| t.total);
    let owner = playlist
        .owner
        .display_name
        .as_deref()
        .unwrap_or(&playlist.owner.id);
    format!(
        "{} [{}] — {} track(s), by {}",
        playlist.name, playlist.id, total, owner
    )
}

fn describe_track(track: &Track) -> String {
    let artists: Vec<&str> = track.artists.iter().map(|a| a.name.as_str()).collect();
    let mins = track.duration_ms / 60_000;
    let secs = (track.duration_ms % 60_000) / 1000;
    if artists.is_empty() {
        format!("{} ({mins}:{secs:02})", track.name)
    } else {
        format!("{} — {} ({mins}:{secs:02})", track.name, artists.join(", "))
    }
}
