pub mod client;
pub mod types;

pub use client::{API_BASE, CatalogClient, CatalogError};
pub use types::{
    Album, Artist, Image, Owner, Page, Playlist, PlaylistTrack, SearchResults, SnapshotId, Track,
    User,
};
