//! Apple Music library database adapter.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rusqlite::{params, Connection, OpenFlags};

use crate::backends::SourceLibrary;
use crate::catalog::{SourceCatalog, SourceTrack};
use crate::path_normalizer::{self, PathConvention};

const DATABASE_EXTENSIONS: [&str; 3] = ["db", "musicdb", "musiclibrary"];
const BUNDLE_DATABASE_EXTENSIONS: [&str; 2] = ["db", "musicdb"];

const TRACKS_QUERY: &str = "SELECT item.title, artist.name, album.title, item.location
    FROM item
    LEFT JOIN artist ON item.artist_pid = artist.persistent_id
    LEFT JOIN album ON item.album_pid = album.persistent_id
    WHERE item.location IS NOT NULL";

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            extensions
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Finds the library database for a file path or a `.musiclibrary` bundle.
///
/// A directory is searched recursively for a `*.db`/`*.musicdb` file whose
/// name contains `Library`; the lexically first match wins.
pub fn locate_database(library_path: &Path) -> Option<PathBuf> {
    if library_path.is_file() && has_extension(library_path, &DATABASE_EXTENSIONS) {
        return Some(library_path.to_path_buf());
    }
    if !library_path.is_dir() {
        return None;
    }

    let mut pending_directories = vec![library_path.to_path_buf()];
    let mut candidates = Vec::new();
    while let Some(directory) = pending_directories.pop() {
        let entries = match std::fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Failed to read directory {}: {}", directory.display(), err);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending_directories.push(path);
                continue;
            }
            let name_matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.contains("Library"));
            if file_type.is_file() && name_matches && has_extension(&path, &BUNDLE_DATABASE_EXTENSIONS)
            {
                candidates.push(path);
            }
        }
    }
    candidates.sort_unstable();
    candidates.into_iter().next()
}

/// Source library read from the Apple Music SQLite database.
pub struct AppleMusicDbLibrary {
    conn: Connection,
    convention: PathConvention,
}

impl AppleMusicDbLibrary {
    pub fn open(library_path: &Path, convention: PathConvention) -> Result<Self, String> {
        let db_path = locate_database(library_path).ok_or_else(|| {
            format!(
                "Could not locate Apple Music library database under {}",
                library_path.display()
            )
        })?;
        info!("Connecting to Apple Music database at: {}", db_path.display());
        let conn = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|err| format!("Failed to open Apple Music database: {err}"))?;
        Ok(Self::from_connection(conn, convention))
    }

    fn from_connection(conn: Connection, convention: PathConvention) -> Self {
        Self { conn, convention }
    }

    fn query_catalog(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<SourceCatalog, rusqlite::Error> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut catalog = SourceCatalog::new();
        for row in rows {
            let (title, artist, album, location) = row?;
            let Some(path) = location.as_deref().and_then(|location| {
                path_normalizer::normalize_source_location(location, self.convention)
            }) else {
                continue;
            };
            catalog.insert(SourceTrack {
                title: title.unwrap_or_default(),
                artist: artist.unwrap_or_default(),
                album: album.unwrap_or_default(),
                path,
            });
        }
        Ok(catalog)
    }

    fn find_playlist_id(
        &self,
        playlist_name: &str,
    ) -> Result<Option<rusqlite::types::Value>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT persistent_id FROM playlist WHERE name LIKE ?1")?;
        let mut rows = stmt.query(params![format!("%{playlist_name}%")])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

impl SourceLibrary for AppleMusicDbLibrary {
    fn get_all_tracks(&self) -> Result<SourceCatalog, String> {
        info!("Retrieving all tracks from Apple Music...");
        let catalog = self
            .query_catalog(TRACKS_QUERY, [])
            .map_err(|err| format!("Failed to retrieve tracks from Apple Music: {err}"))?;
        info!("Retrieved {} tracks from Apple Music", catalog.len());
        Ok(catalog)
    }

    fn get_tracks_by_artist(&self, artist_name: &str) -> Result<SourceCatalog, String> {
        info!("Retrieving tracks for artist '{artist_name}' from Apple Music...");
        let sql = format!("{TRACKS_QUERY} AND artist.name LIKE ?1");
        let catalog = self
            .query_catalog(&sql, params![format!("%{artist_name}%")])
            .map_err(|err| {
                format!("Failed to retrieve tracks for artist '{artist_name}' from Apple Music: {err}")
            })?;
        info!(
            "Retrieved {} tracks for artist '{}' from Apple Music",
            catalog.len(),
            artist_name
        );
        Ok(catalog)
    }

    fn get_playlist_tracks(&self, playlist_name: &str) -> Result<Vec<String>, String> {
        let wrap = |err: rusqlite::Error| {
            format!("Failed to retrieve tracks for playlist '{playlist_name}' from Apple Music: {err}")
        };
        let Some(playlist_id) = self.find_playlist_id(playlist_name).map_err(wrap)? else {
            warn!("Playlist '{playlist_name}' not found in Apple Music");
            return Ok(Vec::new());
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT item.location
                 FROM playlist_item
                 JOIN item ON playlist_item.track_id = item.persistent_id
                 WHERE playlist_item.playlist_id = ?1
                 ORDER BY playlist_item.position",
            )
            .map_err(wrap)?;
        let locations = stmt
            .query_map(params![playlist_id], |row| row.get::<_, Option<String>>(0))
            .map_err(wrap)?;

        let mut paths = Vec::new();
        for location in locations {
            let location = location.map_err(wrap)?;
            if let Some(path) = location.as_deref().and_then(|location| {
                path_normalizer::normalize_source_location(location, self.convention)
            }) {
                paths.push(path);
            }
        }
        info!(
            "Retrieved {} tracks for playlist '{}' from Apple Music",
            paths.len(),
            playlist_name
        );
        Ok(paths)
    }

    fn playlist_names(&self) -> Result<Vec<String>, String> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM playlist WHERE name IS NOT NULL ORDER BY name")
            .map_err(|err| format!("Failed to list Apple Music playlists: {err}"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|err| format!("Failed to list Apple Music playlists: {err}"))?;
        names
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| format!("Failed to list Apple Music playlists: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn fixture_connection() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory db should open");
        conn.execute_batch(
            "CREATE TABLE artist (persistent_id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE album (persistent_id INTEGER PRIMARY KEY, title TEXT);
             CREATE TABLE item (
                persistent_id INTEGER PRIMARY KEY,
                title TEXT,
                artist_pid INTEGER,
                album_pid INTEGER,
                location TEXT
             );
             CREATE TABLE playlist (persistent_id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE playlist_item (playlist_id INTEGER, track_id INTEGER, position INTEGER);

             INSERT INTO artist VALUES (1, 'Radiohead'), (2, 'Portishead');
             INSERT INTO album VALUES (10, 'OK Computer'), (20, 'Dummy');
             INSERT INTO item VALUES
                (100, 'Airbag', 1, 10, 'file:///Music/Radiohead/01%20Airbag.mp3'),
                (101, 'Roads', 2, 20, 'file:///Music/Portishead/11%20Roads.mp3'),
                (102, 'Cloud Only', 2, NULL, 'https://example.com/stream'),
                (103, 'No Location', 1, 10, NULL);
             INSERT INTO playlist VALUES (500, 'Trip Hop Favourites'), (501, 'Empty');
             INSERT INTO playlist_item VALUES (500, 101, 2), (500, 100, 1), (500, 102, 3);",
        )
        .expect("fixture schema should load");
        conn
    }

    fn fixture_library() -> AppleMusicDbLibrary {
        AppleMusicDbLibrary::from_connection(fixture_connection(), PathConvention::Posix)
    }

    #[test]
    fn test_get_all_tracks_decodes_locations() {
        let catalog = fixture_library()
            .get_all_tracks()
            .expect("tracks should load");
        assert_eq!(catalog.len(), 2);
        let airbag = catalog
            .get("/Music/Radiohead/01 Airbag.mp3")
            .expect("decoded path should be present");
        assert_eq!(airbag.artist, "Radiohead");
        assert_eq!(airbag.album, "OK Computer");
    }

    #[test]
    fn test_get_tracks_by_artist_uses_like_filter() {
        let catalog = fixture_library()
            .get_tracks_by_artist("portis")
            .expect("tracks should load");
        let titles: Vec<&str> = catalog.iter().map(|track| track.title.as_str()).collect();
        assert_eq!(titles, vec!["Roads"]);
    }

    #[test]
    fn test_playlist_tracks_are_ordered_by_position() {
        let paths = fixture_library()
            .get_playlist_tracks("trip hop")
            .expect("playlist should load");
        assert_eq!(
            paths,
            vec![
                "/Music/Radiohead/01 Airbag.mp3".to_string(),
                "/Music/Portishead/11 Roads.mp3".to_string(),
            ]
        );
    }

    #[test]
    fn test_unknown_playlist_is_empty() {
        assert!(fixture_library()
            .get_playlist_tracks("Workout")
            .expect("lookup should succeed")
            .is_empty());
    }

    #[test]
    fn test_locate_database_in_bundle_directory() {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be valid")
            .as_nanos();
        let bundle = std::env::temp_dir().join(format!("tunesync_bundle_{nonce}.musiclibrary"));
        let nested = bundle.join("Contents");
        std::fs::create_dir_all(&nested).expect("bundle should be creatable");
        std::fs::write(nested.join("notes.db"), b"").expect("decoy should be writable");
        std::fs::write(nested.join("Library.musicdb"), b"").expect("db should be writable");

        assert_eq!(locate_database(&bundle), Some(nested.join("Library.musicdb")));
        assert_eq!(locate_database(&bundle.join("missing")), None);

        std::fs::remove_dir_all(bundle).expect("bundle should be removable");
    }
}
