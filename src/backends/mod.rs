//! Boundary adapters for the source and managed libraries.
//!
//! Adapters own transport and parsing only. They hand the sync core normalized
//! catalogs and contain no matching or diffing decisions.

pub mod apple_music_db;
pub mod apple_music_xml;
pub mod plex;

use crate::catalog::{ManagedTrack, SourceCatalog};

/// Read-only view of the ground-truth library.
pub trait SourceLibrary {
    fn get_all_tracks(&self) -> Result<SourceCatalog, String>;
    /// Tracks whose artist contains `artist_name`, case-insensitively.
    fn get_tracks_by_artist(&self, artist_name: &str) -> Result<SourceCatalog, String>;
    /// Ordered normalized paths of a playlist; empty when no playlist matches.
    fn get_playlist_tracks(&self, playlist_name: &str) -> Result<Vec<String>, String>;
    fn playlist_names(&self) -> Result<Vec<String>, String>;
}

/// Field values to write to a managed track. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl MetadataUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none()
    }
}

/// Read/write view of the media-server library being corrected.
pub trait ManagedLibrary {
    fn get_all_tracks(&self) -> Result<Vec<ManagedTrack>, String>;
    /// Tracks whose effective artist contains `artist_name`, case-insensitively.
    fn get_tracks_by_artist(&self, artist_name: &str) -> Result<Vec<ManagedTrack>, String>;
    fn search_tracks_by_title(&self, title: &str) -> Result<Vec<ManagedTrack>, String>;
    fn update_track_metadata(
        &self,
        track: &ManagedTrack,
        update: &MetadataUpdate,
    ) -> Result<(), String>;
    /// Creates `name` with exactly `tracks`, replacing a same-named playlist.
    fn create_playlist(&self, name: &str, tracks: &[ManagedTrack]) -> Result<(), String>;
}
