//! Terminal prompts and run reports.
//!
//! Input and output are injected so the flows run against in-memory buffers
//! in tests.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use log::info;

use crate::catalog::ManagedTrack;
use crate::change_log::{ChangeEntry, ChangeLog, ChangeLogStats};
use crate::sync::{CleanScope, PlaylistSyncReport, SyncEngine, SyncStats};

/// Aggregate results of an interactive per-artist clean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractiveCleanStats {
    pub total_artists: usize,
    pub processed_artists: usize,
    pub skipped_artists: usize,
    pub total_tracks: usize,
    pub updated_tracks: usize,
    pub title_updates: usize,
    pub artist_updates: usize,
    pub album_updates: usize,
}

impl InteractiveCleanStats {
    fn absorb(&mut self, run: &SyncStats) {
        self.processed_artists += 1;
        self.updated_tracks += run.updated_tracks;
        self.title_updates += run.title_updates;
        self.artist_updates += run.artist_updates;
        self.album_updates += run.album_updates;
    }
}

enum ArtistChoice {
    Clean,
    Skip,
    Exit,
}

fn io_error(err: std::io::Error) -> String {
    format!("Terminal I/O failed: {err}")
}

/// Prints `message` and reads one trimmed line. `None` means end of input.
fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    message: &str,
) -> Result<Option<String>, String> {
    write!(output, "{message}").map_err(io_error)?;
    output.flush().map_err(io_error)?;
    let mut line = String::new();
    let read = input.read_line(&mut line).map_err(io_error)?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn ask_artist_choice<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> Result<ArtistChoice, String> {
    loop {
        let Some(answer) = prompt(input, output, "\nClean this artist? [y]es/[n]o/[e]xit: ")? else {
            return Ok(ArtistChoice::Exit);
        };
        match answer.to_lowercase().as_str() {
            "y" | "yes" => return Ok(ArtistChoice::Clean),
            "n" | "no" => return Ok(ArtistChoice::Skip),
            "e" | "exit" => return Ok(ArtistChoice::Exit),
            _ => writeln!(output, "Invalid choice. Please enter 'y', 'n', or 'e'.")
                .map_err(io_error)?,
        }
    }
}

fn group_by_artist(tracks: Vec<ManagedTrack>) -> BTreeMap<String, Vec<ManagedTrack>> {
    let mut grouped: BTreeMap<String, Vec<ManagedTrack>> = BTreeMap::new();
    for track in tracks {
        grouped
            .entry(track.artist.effective().to_string())
            .or_default()
            .push(track);
    }
    grouped
}

/// Album names with track counts, in first-seen order.
fn album_counts(tracks: &[ManagedTrack]) -> Vec<(&str, usize)> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for track in tracks {
        match counts.iter_mut().find(|(album, _)| *album == track.album) {
            Some((_, count)) => *count += 1,
            None => counts.push((track.album.as_str(), 1)),
        }
    }
    counts
}

fn write_artist_summary<W: Write>(
    output: &mut W,
    artist: &str,
    tracks: &[ManagedTrack],
    threshold: usize,
) -> std::io::Result<()> {
    writeln!(output, "\nArtist: {artist}")?;
    writeln!(output, "Tracks: {}", tracks.len())?;
    if tracks.len() > threshold {
        writeln!(output, "\nAlbums:")?;
        for (album, count) in album_counts(tracks) {
            writeln!(output, "  - {album} ({count} tracks)")?;
        }
    } else {
        writeln!(output, "\nTracks:")?;
        for track in tracks {
            writeln!(output, "  - {} (Album: {})", track.title, track.album)?;
        }
    }
    Ok(())
}

/// Walks every managed artist in lexical order and asks whether to clean it.
pub fn interactive_clean_all<R: BufRead, W: Write>(
    engine: &mut SyncEngine<'_>,
    input: &mut R,
    output: &mut W,
    threshold: usize,
) -> Result<InteractiveCleanStats, String> {
    info!("Starting interactive library clean...");
    let tracks = engine.managed().get_all_tracks()?;
    let catalog = engine.source().get_all_tracks()?;
    let mut stats = InteractiveCleanStats {
        total_tracks: tracks.len(),
        ..InteractiveCleanStats::default()
    };
    let artists = group_by_artist(tracks);
    stats.total_artists = artists.len();

    writeln!(
        output,
        "Found {} artists with {} total tracks",
        stats.total_artists, stats.total_tracks
    )
    .map_err(io_error)?;

    for (artist, artist_tracks) in &artists {
        write_artist_summary(output, artist, artist_tracks, threshold).map_err(io_error)?;
        match ask_artist_choice(input, output)? {
            ArtistChoice::Clean => {
                info!("Cleaning {} tracks for artist '{}'", artist_tracks.len(), artist);
                let run =
                    engine.clean_tracks(&catalog.filter_by_exact_artist(artist), artist_tracks);
                stats.absorb(&run);
                writeln!(
                    output,
                    "\nCleaned {} of {} tracks for {}",
                    run.updated_tracks, run.total_tracks, artist
                )
                .map_err(io_error)?;
                write_clean_stats(output, &run).map_err(io_error)?;
            }
            ArtistChoice::Skip => {
                stats.skipped_artists += 1;
                writeln!(output, "Skipped {artist}").map_err(io_error)?;
            }
            ArtistChoice::Exit => {
                writeln!(output, "Exiting clean process...").map_err(io_error)?;
                break;
            }
        }
    }

    write_interactive_stats(output, &stats).map_err(io_error)?;
    Ok(stats)
}

/// Top-level menu shown when no subcommand is given. Returns on `0` or end of input.
pub fn run_menu<R: BufRead, W: Write>(
    engine: &mut SyncEngine<'_>,
    change_log: &ChangeLog,
    input: &mut R,
    output: &mut W,
    threshold: usize,
    missing_preview_limit: usize,
) -> Result<(), String> {
    loop {
        writeln!(output, "\n===== tunesync =====").map_err(io_error)?;
        writeln!(output, "1. Clean entire library").map_err(io_error)?;
        writeln!(output, "2. Clean tracks for specific artist").map_err(io_error)?;
        writeln!(output, "3. Sync playlist to Plex").map_err(io_error)?;
        writeln!(output, "4. View cleaning statistics").map_err(io_error)?;
        writeln!(output, "0. Exit").map_err(io_error)?;

        let Some(choice) = prompt(input, output, "\nEnter your choice (0-4): ")? else {
            return Ok(());
        };
        match choice.as_str() {
            "0" => return Ok(()),
            "1" => {
                interactive_clean_all(engine, input, output, threshold)?;
            }
            "2" => {
                let Some(artist) = prompt(input, output, "Enter artist name: ")? else {
                    return Ok(());
                };
                if artist.is_empty() {
                    writeln!(output, "Artist name cannot be empty.").map_err(io_error)?;
                    continue;
                }
                let stats = engine.clean(&CleanScope::Artist(artist))?;
                write_clean_stats(output, &stats).map_err(io_error)?;
            }
            "3" => {
                let names = engine.source().playlist_names()?;
                if !names.is_empty() {
                    writeln!(output, "Available playlists:").map_err(io_error)?;
                    for name in &names {
                        writeln!(output, "  - {name}").map_err(io_error)?;
                    }
                }
                let Some(playlist) = prompt(input, output, "Enter playlist name: ")? else {
                    return Ok(());
                };
                let report = engine.sync_playlist(&playlist, missing_preview_limit)?;
                write_playlist_report(output, &report).map_err(io_error)?;
            }
            "4" => match change_log.stats() {
                Ok(stats) => write_change_log_stats(output, &stats).map_err(io_error)?,
                Err(err) => writeln!(output, "Failed to read cleaning statistics: {err}")
                    .map_err(io_error)?,
            },
            _ => writeln!(output, "Invalid choice. Please try again.").map_err(io_error)?,
        }
    }
}

pub fn write_clean_stats<W: Write>(output: &mut W, stats: &SyncStats) -> std::io::Result<()> {
    writeln!(output, "\nCleaning complete!")?;
    writeln!(output, "Total tracks: {}", stats.total_tracks)?;
    writeln!(output, "Matched tracks: {}", stats.matched_tracks)?;
    writeln!(output, "Updated tracks: {}", stats.updated_tracks)?;
    writeln!(output, "  Title updates: {}", stats.title_updates)?;
    writeln!(output, "  Artist updates: {}", stats.artist_updates)?;
    writeln!(output, "  Album updates: {}", stats.album_updates)?;
    writeln!(output, "Skipped (already cleaned): {}", stats.skipped_tracks)?;
    writeln!(output, "Unmatched tracks: {}", stats.unmatched_tracks)?;
    if stats.failed_updates > 0 {
        writeln!(output, "Failed updates: {}", stats.failed_updates)?;
    }
    Ok(())
}

pub fn write_interactive_stats<W: Write>(
    output: &mut W,
    stats: &InteractiveCleanStats,
) -> std::io::Result<()> {
    writeln!(output, "\n===== Cleaning Complete =====")?;
    writeln!(
        output,
        "Processed {} of {} artists",
        stats.processed_artists, stats.total_artists
    )?;
    writeln!(
        output,
        "Updated {} of {} tracks",
        stats.updated_tracks, stats.total_tracks
    )?;
    writeln!(output, "Title updates: {}", stats.title_updates)?;
    writeln!(output, "Artist updates: {}", stats.artist_updates)?;
    writeln!(output, "Album updates: {}", stats.album_updates)?;
    writeln!(output, "Skipped artists: {}", stats.skipped_artists)
}

pub fn write_playlist_report<W: Write>(
    output: &mut W,
    report: &PlaylistSyncReport,
) -> std::io::Result<()> {
    writeln!(output, "\nPlaylist sync complete!")?;
    writeln!(output, "Total tracks in playlist: {}", report.total_tracks)?;
    writeln!(output, "Matched tracks: {}", report.matched_tracks)?;
    writeln!(output, "Missing tracks: {}", report.missing_tracks)?;
    for name in &report.missing_preview {
        writeln!(output, "  - {name}")?;
    }
    if report.missing_overflow > 0 {
        writeln!(output, "  ... and {} more", report.missing_overflow)?;
    }
    if !report.playlist_written {
        writeln!(output, "Playlist was not written.")?;
    }
    Ok(())
}

pub fn write_change_log_stats<W: Write>(
    output: &mut W,
    stats: &ChangeLogStats,
) -> std::io::Result<()> {
    writeln!(output, "\nCleaning Statistics:")?;
    writeln!(output, "Total changes made: {}", stats.total_changes)?;
    writeln!(output, "Tracks modified: {}", stats.tracks_changed)?;
    writeln!(output, "Changes by field:")?;
    for (field, count) in &stats.per_field {
        writeln!(output, "  - {field}: {count}")?;
    }
    Ok(())
}

pub fn write_history<W: Write>(output: &mut W, entries: &[ChangeEntry]) -> std::io::Result<()> {
    if entries.is_empty() {
        return writeln!(output, "No recorded changes.");
    }
    for entry in entries {
        writeln!(
            output,
            "{}  {}  '{}' -> '{}'",
            entry.timestamp, entry.field, entry.old_value, entry.new_value
        )?;
    }
    Ok(())
}
