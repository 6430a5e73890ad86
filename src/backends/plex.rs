//! Plex Media Server adapter for the managed library.

use std::time::Duration;

use log::{debug, info};
use serde_json::Value;

use crate::backends::{ManagedLibrary, MetadataUpdate};
use crate::catalog::{ArtistCredit, ManagedTrack, TrackIdentity};

const TRACK_TYPE: &str = "10";
const PAGE_SIZE: usize = 500;
const CLIENT_ID: &str = "tunesync";

/// Connection settings for one Plex music section.
#[derive(Debug, Clone)]
pub struct PlexConnection {
    pub url: String,
    pub token: String,
    pub section_id: u32,
}

/// Plex adapter backed by `ureq`.
pub struct PlexClient {
    http_client: ureq::Agent,
    connection: PlexConnection,
    machine_identifier: String,
}

impl PlexClient {
    /// Connects to the server and verifies the music section exists.
    ///
    /// Fails on an invalid token, a missing section, or an unreachable server.
    pub fn connect(connection: PlexConnection) -> Result<Self, String> {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(60))
            .timeout_write(Duration::from_secs(15))
            .build();
        let mut client = Self {
            http_client,
            connection,
            machine_identifier: String::new(),
        };

        info!("Connecting to Plex server at {}", client.connection.url);
        let identity = client.request_json("GET", "/", &[])?;
        client.machine_identifier = identity
            .get("MediaContainer")
            .and_then(|value| value.get("machineIdentifier"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| "Plex server response missing machineIdentifier".to_string())?;

        let section_path = format!("/library/sections/{}", client.connection.section_id);
        let section = client.request_json("GET", &section_path, &[])?;
        let section_title = Self::array_or_single(
            section
                .get("MediaContainer")
                .and_then(|value| value.get("Directory")),
        )
        .first()
        .and_then(|directory| directory.get("title"))
        .and_then(Value::as_str)
        .unwrap_or("Music")
        .to_string();
        info!("Connected to Plex music library: {section_title}");
        Ok(client)
    }

    fn endpoint_base(url: &str) -> String {
        url.trim().trim_end_matches('/').to_string()
    }

    fn api_url(&self, path: &str, params: &[(String, String)]) -> String {
        let base = format!("{}{}", Self::endpoint_base(&self.connection.url), path);
        if params.is_empty() {
            return base;
        }
        let query_parts: Vec<String> = params
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect();
        format!("{base}?{}", query_parts.join("&"))
    }

    fn send(
        &self,
        method: &str,
        path: &str,
        params: &[(String, String)],
    ) -> Result<ureq::Response, String> {
        let url = self.api_url(path, params);
        debug!("Plex {method} {path}");
        self.http_client
            .request(method, &url)
            .set("X-Plex-Token", &self.connection.token)
            .set("X-Plex-Client-Identifier", CLIENT_ID)
            .set("Accept", "application/json")
            .call()
            .map_err(|err| match err {
                ureq::Error::Status(401, _) => {
                    "Plex rejected the request: invalid token".to_string()
                }
                ureq::Error::Status(404, _) => format!("Plex resource not found ({method} {path})"),
                other => format!("Plex request failed ({method} {path}): {other}"),
            })
    }

    fn request_json(
        &self,
        method: &str,
        path: &str,
        params: &[(String, String)],
    ) -> Result<Value, String> {
        self.send(method, path, params)?
            .into_json()
            .map_err(|err| format!("Plex response parse failed ({method} {path}): {err}"))
    }

    fn array_or_single(value: Option<&Value>) -> Vec<&Value> {
        match value {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(item @ Value::Object(_)) => vec![item],
            _ => Vec::new(),
        }
    }

    fn string_or_number(value: Option<&Value>) -> Option<String> {
        let value = value?;
        value
            .as_str()
            .map(ToOwned::to_owned)
            .or_else(|| value.as_i64().map(|number| number.to_string()))
    }

    fn parse_track(metadata: &Value) -> Option<ManagedTrack> {
        let identity = TrackIdentity::new(Self::string_or_number(metadata.get("ratingKey"))?);
        let text = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        };
        let media_files = Self::array_or_single(metadata.get("Media"))
            .into_iter()
            .flat_map(|media| Self::array_or_single(media.get("Part")))
            .filter_map(|part| part.get("file").and_then(Value::as_str))
            .map(ToOwned::to_owned)
            .collect();
        Some(ManagedTrack {
            identity,
            title: text("title").unwrap_or_default(),
            artist: ArtistCredit {
                track_artist: text("originalTitle"),
                album_artist: text("grandparentTitle"),
            },
            album: text("parentTitle").unwrap_or_default(),
            media_files,
        })
    }

    fn parse_tracks(payload: &Value) -> Vec<ManagedTrack> {
        Self::array_or_single(
            payload
                .get("MediaContainer")
                .and_then(|value| value.get("Metadata")),
        )
        .into_iter()
        .filter_map(Self::parse_track)
        .collect()
    }

    fn fetch_tracks(&self, filters: &[(String, String)]) -> Result<Vec<ManagedTrack>, String> {
        let path = format!("/library/sections/{}/all", self.connection.section_id);
        let mut offset = 0usize;
        let mut tracks = Vec::new();
        loop {
            let mut params = vec![
                ("type".to_string(), TRACK_TYPE.to_string()),
                ("X-Plex-Container-Start".to_string(), offset.to_string()),
                ("X-Plex-Container-Size".to_string(), PAGE_SIZE.to_string()),
            ];
            params.extend_from_slice(filters);
            let payload = self.request_json("GET", &path, &params)?;
            let page = Self::parse_tracks(&payload);
            let page_len = page.len();
            tracks.extend(page);
            offset = offset.saturating_add(page_len);
            if page_len < PAGE_SIZE {
                break;
            }
        }
        Ok(tracks)
    }

    fn update_params(track: &ManagedTrack, update: &MetadataUpdate) -> Vec<(String, String)> {
        let mut params = vec![
            ("type".to_string(), TRACK_TYPE.to_string()),
            ("id".to_string(), track.identity.as_str().to_string()),
        ];
        let fields = [
            ("title", update.title.as_ref()),
            ("originalTitle", update.artist.as_ref()),
            ("parentTitle", update.album.as_ref()),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                params.push((format!("{key}.value"), value.clone()));
                params.push((format!("{key}.locked"), "1".to_string()));
            }
        }
        params
    }

    fn playlist_uri(&self, tracks: &[ManagedTrack]) -> String {
        let keys: Vec<&str> = tracks.iter().map(|track| track.identity.as_str()).collect();
        format!(
            "server://{}/com.plexapp.plugins.library/library/metadata/{}",
            self.machine_identifier,
            keys.join(",")
        )
    }

    fn find_playlist_keys(&self, name: &str) -> Result<Vec<String>, String> {
        let payload = self.request_json(
            "GET",
            "/playlists",
            &[("playlistType".to_string(), "audio".to_string())],
        )?;
        let wanted = name.to_lowercase();
        Ok(Self::array_or_single(
            payload
                .get("MediaContainer")
                .and_then(|value| value.get("Metadata")),
        )
        .into_iter()
        .filter(|playlist| {
            playlist
                .get("title")
                .and_then(Value::as_str)
                .is_some_and(|title| title.to_lowercase() == wanted)
        })
        .filter_map(|playlist| Self::string_or_number(playlist.get("ratingKey")))
        .collect())
    }
}

impl ManagedLibrary for PlexClient {
    fn get_all_tracks(&self) -> Result<Vec<ManagedTrack>, String> {
        info!("Retrieving all tracks from Plex...");
        let tracks = self.fetch_tracks(&[])?;
        info!("Retrieved {} tracks from Plex", tracks.len());
        Ok(tracks)
    }

    fn get_tracks_by_artist(&self, artist_name: &str) -> Result<Vec<ManagedTrack>, String> {
        info!("Retrieving tracks for artist: {artist_name}");
        let needle = artist_name.to_lowercase();
        let tracks: Vec<ManagedTrack> = self
            .fetch_tracks(&[])?
            .into_iter()
            .filter(|track| track.artist.effective().to_lowercase().contains(&needle))
            .collect();
        info!(
            "Retrieved {} tracks for artist '{}'",
            tracks.len(),
            artist_name
        );
        Ok(tracks)
    }

    fn search_tracks_by_title(&self, title: &str) -> Result<Vec<ManagedTrack>, String> {
        self.fetch_tracks(&[("title".to_string(), title.to_string())])
    }

    fn update_track_metadata(
        &self,
        track: &ManagedTrack,
        update: &MetadataUpdate,
    ) -> Result<(), String> {
        if update.is_empty() {
            return Ok(());
        }
        let path = format!("/library/sections/{}/all", self.connection.section_id);
        self.send("PUT", &path, &Self::update_params(track, update))
            .map(|_| ())
            .map_err(|err| format!("Failed to update track {}: {err}", track.identity))
    }

    fn create_playlist(&self, name: &str, tracks: &[ManagedTrack]) -> Result<(), String> {
        let trimmed_name = name.trim();
        if trimmed_name.is_empty() {
            return Err("playlist name cannot be empty".to_string());
        }
        if tracks.is_empty() {
            return Err("playlist must contain at least one track".to_string());
        }

        for key in self.find_playlist_keys(trimmed_name)? {
            info!("Playlist '{trimmed_name}' already exists, replacing it");
            self.send("DELETE", &format!("/playlists/{key}"), &[])?;
        }

        info!(
            "Creating playlist '{}' with {} tracks",
            trimmed_name,
            tracks.len()
        );
        self.send(
            "POST",
            "/playlists",
            &[
                ("type".to_string(), "audio".to_string()),
                ("title".to_string(), trimmed_name.to_string()),
                ("smart".to_string(), "0".to_string()),
                ("uri".to_string(), self.playlist_uri(tracks)),
            ],
        )?;
        Ok(())
    }
}
