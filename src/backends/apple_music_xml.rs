//! Apple Music / iTunes XML library export adapter.
//!
//! The export is an XML property list. It is read into a small value tree
//! first, then the `Tracks` and `Playlists` entries are lifted into a source
//! catalog and ordered playlist path lists.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, info, warn};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::backends::SourceLibrary;
use crate::catalog::{SourceCatalog, SourceTrack};
use crate::path_normalizer::{self, PathConvention};

#[derive(Debug, Clone, PartialEq)]
enum PlistValue {
    Dict(Vec<(String, PlistValue)>),
    Array(Vec<PlistValue>),
    String(String),
    Integer(i64),
    Bool(bool),
    Other,
}

impl PlistValue {
    fn get(&self, key: &str) -> Option<&PlistValue> {
        match self {
            PlistValue::Dict(entries) => entries
                .iter()
                .find(|(entry_key, _)| entry_key == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            PlistValue::String(value) => Some(value),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            PlistValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    fn text(&self, key: &str) -> String {
        self.get(key)
            .and_then(PlistValue::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

struct PlistReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
}

impl<R: BufRead> PlistReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: Reader::from_reader(inner),
            buf: Vec::new(),
        }
    }

    fn next_event(&mut self) -> Result<Event<'static>, String> {
        self.buf.clear();
        self.reader
            .read_event_into(&mut self.buf)
            .map(|event| event.into_owned())
            .map_err(|err| format!("XML parse error: {err}"))
    }

    /// Next event that can open or close a value; whitespace and prolog are skipped.
    fn next_structural(&mut self) -> Result<Event<'static>, String> {
        loop {
            match self.next_event()? {
                Event::Text(_)
                | Event::Comment(_)
                | Event::Decl(_)
                | Event::DocType(_)
                | Event::PI(_) => continue,
                Event::Eof => return Err("unexpected end of XML document".to_string()),
                event => return Ok(event),
            }
        }
    }

    fn read_text(&mut self) -> Result<String, String> {
        let mut text = String::new();
        loop {
            match self.next_event()? {
                Event::Text(value) => {
                    let unescaped = value
                        .unescape()
                        .map_err(|err| format!("XML text decode error: {err}"))?;
                    text.push_str(&unescaped);
                }
                Event::CData(value) => {
                    let raw = String::from_utf8(value.into_inner().into_owned())
                        .map_err(|err| format!("XML CDATA decode error: {err}"))?;
                    text.push_str(&raw);
                }
                Event::End(_) => return Ok(text),
                Event::Eof => return Err("unexpected end of XML document".to_string()),
                _ => {}
            }
        }
    }

    fn parse_document(&mut self) -> Result<PlistValue, String> {
        loop {
            match self.next_structural()? {
                Event::Start(element) if element.name().as_ref() == b"plist" => {
                    let event = self.next_structural()?;
                    return self.parse_value(event);
                }
                event @ (Event::Start(_) | Event::Empty(_)) => return self.parse_value(event),
                _ => {}
            }
        }
    }

    fn parse_value(&mut self, event: Event<'static>) -> Result<PlistValue, String> {
        match event {
            Event::Start(element) => match element.name().as_ref() {
                b"dict" => self.parse_dict(),
                b"array" => self.parse_array(),
                b"string" => Ok(PlistValue::String(self.read_text()?)),
                b"integer" => {
                    let text = self.read_text()?;
                    text.trim()
                        .parse::<i64>()
                        .map(PlistValue::Integer)
                        .map_err(|err| format!("invalid plist integer '{text}': {err}"))
                }
                b"true" | b"false" => {
                    let value = element.name().as_ref() == b"true";
                    self.read_text()?;
                    Ok(PlistValue::Bool(value))
                }
                _ => {
                    self.read_text()?;
                    Ok(PlistValue::Other)
                }
            },
            Event::Empty(element) => Ok(match element.name().as_ref() {
                b"true" => PlistValue::Bool(true),
                b"false" => PlistValue::Bool(false),
                b"string" => PlistValue::String(String::new()),
                b"dict" => PlistValue::Dict(Vec::new()),
                b"array" => PlistValue::Array(Vec::new()),
                _ => PlistValue::Other,
            }),
            other => Err(format!("unexpected XML event in plist value: {other:?}")),
        }
    }

    fn parse_dict(&mut self) -> Result<PlistValue, String> {
        let mut entries = Vec::new();
        loop {
            match self.next_structural()? {
                Event::End(_) => return Ok(PlistValue::Dict(entries)),
                Event::Start(element) if element.name().as_ref() == b"key" => {
                    let key = self.read_text()?;
                    let event = self.next_structural()?;
                    let value = self.parse_value(event)?;
                    entries.push((key, value));
                }
                other => return Err(format!("expected <key> in plist dict, found {other:?}")),
            }
        }
    }

    fn parse_array(&mut self) -> Result<PlistValue, String> {
        let mut items = Vec::new();
        loop {
            match self.next_structural()? {
                Event::End(_) => return Ok(PlistValue::Array(items)),
                event => items.push(self.parse_value(event)?),
            }
        }
    }
}

/// Source library loaded from an XML export.
#[derive(Debug, Clone, Default)]
pub struct AppleMusicXmlLibrary {
    catalog: SourceCatalog,
    /// Playlists in export order.
    playlists: Vec<(String, Vec<String>)>,
}

impl AppleMusicXmlLibrary {
    pub fn load(path: &Path, convention: PathConvention) -> Result<Self, String> {
        info!("Loading Apple Music XML library from: {}", path.display());
        let file = File::open(path)
            .map_err(|err| format!("XML library file not readable ({}): {err}", path.display()))?;
        Self::from_reader(BufReader::new(file), convention)
    }

    pub fn from_reader<R: BufRead>(reader: R, convention: PathConvention) -> Result<Self, String> {
        let root = PlistReader::new(reader).parse_document()?;
        let mut library = Self::default();

        let mut path_by_track_id: HashMap<String, String> = HashMap::new();
        match root.get("Tracks") {
            Some(PlistValue::Dict(tracks)) => {
                for (track_id, track) in tracks {
                    let Some(location) = track.get("Location").and_then(PlistValue::as_str)
                    else {
                        continue;
                    };
                    let Some(path) =
                        path_normalizer::normalize_source_location(location, convention)
                    else {
                        debug!("Skipping undecodable location for track {track_id}");
                        continue;
                    };
                    library.catalog.insert(SourceTrack {
                        title: track.text("Name"),
                        artist: track.text("Artist"),
                        album: track.text("Album"),
                        path: path.clone(),
                    });
                    path_by_track_id.insert(track_id.clone(), path);
                }
                info!(
                    "Processed {} tracks from XML library",
                    library.catalog.len()
                );
            }
            _ => warn!("No tracks found in XML library"),
        }

        match root.get("Playlists") {
            Some(PlistValue::Array(playlists)) => {
                for playlist in playlists {
                    if let Some((name, paths)) = Self::lift_playlist(playlist, &path_by_track_id) {
                        debug!("Playlist '{}' contains {} tracks", name, paths.len());
                        library.playlists.push((name, paths));
                    }
                }
                info!(
                    "Processed {} playlists from XML library",
                    library.playlists.len()
                );
            }
            _ => warn!("No playlists found in XML library"),
        }

        Ok(library)
    }

    fn lift_playlist(
        playlist: &PlistValue,
        path_by_track_id: &HashMap<String, String>,
    ) -> Option<(String, Vec<String>)> {
        let is_master = playlist
            .get("Master")
            .and_then(PlistValue::as_bool)
            .unwrap_or(false);
        if is_master || playlist.get("Distinguished Kind").is_some() {
            return None;
        }
        let name = playlist.text("Name");
        if name.is_empty() {
            return None;
        }

        let paths: Vec<String> = match playlist.get("Playlist Items") {
            Some(PlistValue::Array(items)) => items
                .iter()
                .filter_map(|item| match item.get("Track ID") {
                    Some(PlistValue::Integer(id)) => path_by_track_id.get(&id.to_string()),
                    Some(PlistValue::String(id)) => path_by_track_id.get(id),
                    _ => None,
                })
                .cloned()
                .collect(),
            _ => Vec::new(),
        };
        (!paths.is_empty()).then_some((name, paths))
    }
}

impl SourceLibrary for AppleMusicXmlLibrary {
    fn get_all_tracks(&self) -> Result<SourceCatalog, String> {
        Ok(self.catalog.clone())
    }

    fn get_tracks_by_artist(&self, artist_name: &str) -> Result<SourceCatalog, String> {
        Ok(self.catalog.filter_by_artist(artist_name))
    }

    fn get_playlist_tracks(&self, playlist_name: &str) -> Result<Vec<String>, String> {
        if let Some((_, paths)) = self.playlists.iter().find(|(name, _)| name == playlist_name) {
            return Ok(paths.clone());
        }

        let wanted = playlist_name.to_lowercase();
        if let Some((_, paths)) = self
            .playlists
            .iter()
            .find(|(name, _)| name.to_lowercase() == wanted)
        {
            return Ok(paths.clone());
        }

        if let Some((name, paths)) = self
            .playlists
            .iter()
            .find(|(name, _)| name.to_lowercase().contains(&wanted))
        {
            info!("Using partial match for playlist: '{name}'");
            return Ok(paths.clone());
        }

        warn!("Playlist '{playlist_name}' not found");
        Ok(Vec::new())
    }

    fn playlist_names(&self) -> Result<Vec<String>, String> {
        Ok(self.playlists.iter().map(|(name, _)| name.clone()).collect())
    }
}
