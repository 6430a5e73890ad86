//! Cross-library track identity resolution.
//!
//! Matching is tiered: the first tier that yields a candidate wins and there is
//! no scoring across tiers. Title/artist text similarity is never used.

use log::{debug, warn};

use crate::backends::ManagedLibrary;
use crate::catalog::{ManagedTrack, SourceCatalog, SourceTrack};
use crate::path_normalizer;

/// Tier that produced a source match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    ExactPath,
    Basename,
}

/// Source record matched to a managed track.
#[derive(Debug, Clone, Copy)]
pub struct SourceMatch<'a> {
    pub track: &'a SourceTrack,
    pub tier: MatchTier,
}

/// Finds the source record describing the same file as `managed`.
///
/// Tier 1 compares the managed track's raw path to catalog keys. Tier 2
/// compares basenames (case-sensitive) and takes the lexically first catalog
/// path with that basename.
pub fn resolve_source_track<'a>(
    managed: &ManagedTrack,
    catalog: &'a SourceCatalog,
) -> Option<SourceMatch<'a>> {
    let file_path = managed.file_path()?;

    if let Some(track) = catalog.get(file_path) {
        return Some(SourceMatch {
            track,
            tier: MatchTier::ExactPath,
        });
    }

    let name = path_normalizer::basename(file_path);
    if name.is_empty() {
        return None;
    }
    catalog.first_with_basename(name).map(|track| SourceMatch {
        track,
        tier: MatchTier::Basename,
    })
}

/// Picks the managed track for a playlist entry from a title search result.
///
/// A candidate with a media part whose basename equals `file_name` wins;
/// otherwise the first candidate is accepted as a best effort.
pub fn pick_playlist_candidate(file_name: &str, candidates: Vec<ManagedTrack>) -> Option<ManagedTrack> {
    let exact_index = candidates.iter().position(|candidate| {
        candidate
            .media_files
            .iter()
            .any(|file| path_normalizer::basename(file) == file_name)
    });
    match exact_index {
        Some(index) => candidates.into_iter().nth(index),
        None => {
            let fallback = candidates.into_iter().next();
            if let Some(track) = &fallback {
                debug!(
                    "No exact file match for '{}', using first title match {}",
                    file_name, track.identity
                );
            }
            fallback
        }
    }
}

/// Resolves a source playlist path to a managed track.
///
/// The managed library is searched by the file stem as title, then
/// disambiguated by basename. Lookup errors are logged and reported as no match.
pub fn find_managed_track_by_filename(
    library: &dyn ManagedLibrary,
    source_path: &str,
) -> Option<ManagedTrack> {
    let file_name = path_normalizer::basename(source_path);
    let title = path_normalizer::file_stem(source_path);
    if title.is_empty() {
        return None;
    }
    match library.search_tracks_by_title(title) {
        Ok(candidates) => pick_playlist_candidate(file_name, candidates),
        Err(err) => {
            warn!("Error finding track by filename '{}': {}", source_path, err);
            None
        }
    }
}
