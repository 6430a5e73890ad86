//! In-memory library fakes shared by workflow tests.

use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;

use crate::backends::{ManagedLibrary, MetadataUpdate, SourceLibrary};
use crate::catalog::{ArtistCredit, ManagedTrack, SourceCatalog, SourceTrack, TrackIdentity};

pub fn source_track(path: &str, title: &str, artist: &str, album: &str) -> SourceTrack {
    SourceTrack {
        title: title.to_string(),
        artist: artist.to_string(),
        album: album.to_string(),
        path: path.to_string(),
    }
}

pub fn managed_track(key: &str, title: &str, artist: &str, album: &str, file: &str) -> ManagedTrack {
    ManagedTrack {
        identity: TrackIdentity::new(key),
        title: title.to_string(),
        artist: ArtistCredit {
            track_artist: None,
            album_artist: Some(artist.to_string()),
        },
        album: album.to_string(),
        media_files: vec![file.to_string()],
    }
}

pub struct FakeSourceLibrary {
    catalog: SourceCatalog,
    playlists: HashMap<String, Vec<String>>,
}

impl FakeSourceLibrary {
    pub fn new(tracks: Vec<SourceTrack>) -> Self {
        Self {
            catalog: tracks.into_iter().collect(),
            playlists: HashMap::new(),
        }
    }

    pub fn add_playlist(&mut self, name: &str, paths: Vec<String>) {
        self.playlists.insert(name.to_string(), paths);
    }
}

impl SourceLibrary for FakeSourceLibrary {
    fn get_all_tracks(&self) -> Result<SourceCatalog, String> {
        Ok(self.catalog.clone())
    }

    fn get_tracks_by_artist(&self, artist_name: &str) -> Result<SourceCatalog, String> {
        Ok(self.catalog.filter_by_artist(artist_name))
    }

    fn get_playlist_tracks(&self, playlist_name: &str) -> Result<Vec<String>, String> {
        Ok(self.playlists.get(playlist_name).cloned().unwrap_or_default())
    }

    fn playlist_names(&self) -> Result<Vec<String>, String> {
        let mut names: Vec<String> = self.playlists.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Managed library that applies accepted updates to its own records.
#[derive(Default)]
pub struct FakeManagedLibrary {
    tracks: RefCell<Vec<ManagedTrack>>,
    updates: RefCell<Vec<(TrackIdentity, MetadataUpdate)>>,
    playlists: RefCell<Vec<(String, Vec<TrackIdentity>)>>,
    reject_updates: RefCell<bool>,
    library_scans: Cell<usize>,
}

impl FakeManagedLibrary {
    pub fn new(tracks: Vec<ManagedTrack>) -> Self {
        Self {
            tracks: RefCell::new(tracks),
            ..Self::default()
        }
    }

    pub fn reject_updates(&self, reject: bool) {
        *self.reject_updates.borrow_mut() = reject;
    }

    pub fn updates(&self) -> Vec<(TrackIdentity, MetadataUpdate)> {
        self.updates.borrow().clone()
    }

    pub fn playlists(&self) -> Ref<'_, Vec<(String, Vec<TrackIdentity>)>> {
        self.playlists.borrow()
    }

    /// Calls that list tracks across the whole section.
    pub fn library_scans(&self) -> usize {
        self.library_scans.get()
    }

    pub fn set_title(&self, key: &str, title: &str) {
        self.edit(key, |track| track.title = title.to_string());
    }

    pub fn set_album(&self, key: &str, album: &str) {
        self.edit(key, |track| track.album = album.to_string());
    }

    fn edit(&self, key: &str, apply: impl FnOnce(&mut ManagedTrack)) {
        if let Some(track) = self
            .tracks
            .borrow_mut()
            .iter_mut()
            .find(|track| track.identity.as_str() == key)
        {
            apply(track);
        }
    }
}

impl ManagedLibrary for FakeManagedLibrary {
    fn get_all_tracks(&self) -> Result<Vec<ManagedTrack>, String> {
        self.library_scans.set(self.library_scans.get() + 1);
        Ok(self.tracks.borrow().clone())
    }

    fn get_tracks_by_artist(&self, artist_name: &str) -> Result<Vec<ManagedTrack>, String> {
        self.library_scans.set(self.library_scans.get() + 1);
        let needle = artist_name.to_lowercase();
        Ok(self
            .tracks
            .borrow()
            .iter()
            .filter(|track| track.artist.effective().to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    fn search_tracks_by_title(&self, title: &str) -> Result<Vec<ManagedTrack>, String> {
        let needle = title.to_lowercase();
        Ok(self
            .tracks
            .borrow()
            .iter()
            .filter(|track| track.title.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    fn update_track_metadata(
        &self,
        track: &ManagedTrack,
        update: &MetadataUpdate,
    ) -> Result<(), String> {
        if *self.reject_updates.borrow() {
            return Err(format!("update of {} rejected", track.identity));
        }
        self.updates
            .borrow_mut()
            .push((track.identity.clone(), update.clone()));
        self.edit(track.identity.as_str(), |stored| {
            if let Some(title) = &update.title {
                stored.title = title.clone();
            }
            if let Some(artist) = &update.artist {
                stored.artist.track_artist = Some(artist.clone());
            }
            if let Some(album) = &update.album {
                stored.album = album.clone();
            }
        });
        Ok(())
    }

    fn create_playlist(&self, name: &str, tracks: &[ManagedTrack]) -> Result<(), String> {
        let mut playlists = self.playlists.borrow_mut();
        playlists.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        playlists.push((
            name.to_string(),
            tracks.iter().map(|track| track.identity.clone()).collect(),
        ));
        Ok(())
    }
}
