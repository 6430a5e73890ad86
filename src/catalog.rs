//! Normalized track and catalog types shared by adapters and the sync core.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::path_normalizer;

/// Stable managed-library key for a track (the Plex rating key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackIdentity(String);

impl TrackIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata fields reconciled between the two libraries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetadataField {
    Title,
    Artist,
    Album,
}

impl MetadataField {
    pub const ALL: [MetadataField; 3] = [Self::Title, Self::Artist, Self::Album];

    /// Column value persisted in the change log.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Artist => "artist",
            Self::Album => "album",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "title" => Some(Self::Title),
            "artist" => Some(Self::Artist),
            "album" => Some(Self::Album),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ground-truth metadata for one file in the source library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTrack {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Normalized path, never URL-encoded and never `file://` prefixed.
    pub path: String,
}

/// Source tracks keyed by normalized path.
///
/// Iteration is lexical by path so basename matching picks the same record no
/// matter which adapter built the catalog.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    tracks: BTreeMap<String, SourceTrack>,
    first_path_by_basename: HashMap<String, String>,
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a track, replacing any earlier record with the same path.
    pub fn insert(&mut self, track: SourceTrack) {
        let name = path_normalizer::basename(&track.path).to_string();
        match self.first_path_by_basename.get(&name) {
            Some(existing) if existing.as_str() <= track.path.as_str() => {}
            _ => {
                self.first_path_by_basename.insert(name, track.path.clone());
            }
        }
        self.tracks.insert(track.path.clone(), track);
    }

    pub fn get(&self, path: &str) -> Option<&SourceTrack> {
        self.tracks.get(path)
    }

    /// Lexically first track whose basename equals `name` (case-sensitive).
    pub fn first_with_basename(&self, name: &str) -> Option<&SourceTrack> {
        self.first_path_by_basename
            .get(name)
            .and_then(|path| self.tracks.get(path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceTrack> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Case-insensitive substring filter on the artist field.
    pub fn filter_by_artist(&self, query: &str) -> SourceCatalog {
        let needle = query.to_lowercase();
        self.iter()
            .filter(|track| track.artist.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    /// Tracks whose artist equals `artist`, ignoring case and surrounding whitespace.
    pub fn filter_by_exact_artist(&self, artist: &str) -> SourceCatalog {
        let wanted = artist.trim().to_lowercase();
        self.iter()
            .filter(|track| track.artist.trim().to_lowercase() == wanted)
            .cloned()
            .collect()
    }
}

impl FromIterator<SourceTrack> for SourceCatalog {
    fn from_iter<I: IntoIterator<Item = SourceTrack>>(iter: I) -> Self {
        let mut catalog = SourceCatalog::new();
        for track in iter {
            catalog.insert(track);
        }
        catalog
    }
}

/// Artist credit as reported by the managed library.
///
/// The effective artist is the per-track override when it is present and
/// non-empty, otherwise the album artist, otherwise the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtistCredit {
    pub track_artist: Option<String>,
    pub album_artist: Option<String>,
}

impl ArtistCredit {
    pub fn effective(&self) -> &str {
        self.track_artist
            .as_deref()
            .filter(|value| !value.is_empty())
            .or(self.album_artist.as_deref())
            .unwrap_or_default()
    }
}

/// Track record as reported by the managed library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedTrack {
    pub identity: TrackIdentity,
    pub title: String,
    pub artist: ArtistCredit,
    pub album: String,
    /// Raw file locations of the track's media parts, in server order.
    pub media_files: Vec<String>,
}

impl ManagedTrack {
    /// Location of the first media part, used for catalog matching.
    pub fn file_path(&self) -> Option<&str> {
        self.media_files.first().map(String::as_str)
    }

    pub fn field_value(&self, field: MetadataField) -> &str {
        match field {
            MetadataField::Title => &self.title,
            MetadataField::Artist => self.artist.effective(),
            MetadataField::Album => &self.album,
        }
    }
}

impl SourceTrack {
    pub fn field_value(&self, field: MetadataField) -> &str {
        match field {
            MetadataField::Title => &self.title,
            MetadataField::Artist => &self.artist,
            MetadataField::Album => &self.album,
        }
    }
}
