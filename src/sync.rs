//! Sync workflows composing resolution, diffing, and the change log.
//!
//! Full-library and artist cleans share one pipeline; they differ only in the
//! [`CleanScope`] used to enumerate tracks. Callers that enumerate tracks
//! themselves run the same pipeline through [`SyncEngine::clean_tracks`].
//! Each workflow is a single linear pass and keeps no state beyond the change log.

use std::collections::BTreeSet;
use std::fmt;

use log::{debug, error, info, warn};

use crate::backends::{ManagedLibrary, MetadataUpdate, SourceLibrary};
use crate::catalog::{ManagedTrack, MetadataField, SourceCatalog, TrackIdentity};
use crate::change_log::ChangeLog;
use crate::differ::{self, FieldChange};
use crate::path_normalizer;
use crate::resolver;

/// Whether a full run skips whole tracks or only individual fields that were
/// already cleaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Any logged change for a track excludes it from later runs.
    #[default]
    Track,
    /// Tracks are always revisited; only logged fields are left alone.
    Field,
}

/// Enumeration stage of the clean pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanScope {
    All,
    /// Tracks whose artist contains the query, case-insensitively, on both sides.
    /// A blank query is rejected.
    Artist(String),
}

impl CleanScope {
    fn enumerate(
        &self,
        source: &dyn SourceLibrary,
        managed: &dyn ManagedLibrary,
    ) -> Result<(SourceCatalog, Vec<ManagedTrack>), String> {
        match self {
            CleanScope::All => Ok((source.get_all_tracks()?, managed.get_all_tracks()?)),
            CleanScope::Artist(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err("Artist name cannot be empty".to_string());
                }
                Ok((
                    source.get_tracks_by_artist(name)?,
                    managed.get_tracks_by_artist(name)?,
                ))
            }
        }
    }
}

impl fmt::Display for CleanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanScope::All => f.write_str("full library"),
            CleanScope::Artist(name) => write!(f, "artist '{name}'"),
        }
    }
}

/// Per-run result for one managed track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Already cleaned in an earlier run.
    Skipped,
    NoMatch,
    MatchedNoChange,
    Updated { fields: Vec<MetadataField> },
    /// The managed library refused the write; nothing was logged.
    UpdateRejected,
}

/// Receives progress from a running workflow.
pub trait SyncObserver {
    fn track_processed(&mut self, _track: &ManagedTrack, _outcome: &TrackOutcome) {}
    fn change_applied(&mut self, _change: &FieldChange) {}
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}

/// Counters accumulated by a clean run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub total_tracks: usize,
    pub matched_tracks: usize,
    pub updated_tracks: usize,
    pub title_updates: usize,
    pub artist_updates: usize,
    pub album_updates: usize,
    pub skipped_tracks: usize,
    pub unmatched_tracks: usize,
    pub failed_updates: usize,
}

impl SyncStats {
    fn record(&mut self, outcome: &TrackOutcome) {
        match outcome {
            TrackOutcome::Skipped => self.skipped_tracks += 1,
            TrackOutcome::NoMatch => self.unmatched_tracks += 1,
            TrackOutcome::MatchedNoChange => self.matched_tracks += 1,
            TrackOutcome::UpdateRejected => {
                self.matched_tracks += 1;
                self.failed_updates += 1;
            }
            TrackOutcome::Updated { fields } => {
                self.matched_tracks += 1;
                self.updated_tracks += 1;
                for field in fields {
                    match field {
                        MetadataField::Title => self.title_updates += 1,
                        MetadataField::Artist => self.artist_updates += 1,
                        MetadataField::Album => self.album_updates += 1,
                    }
                }
            }
        }
    }
}

/// Result of replicating one source playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistSyncReport {
    pub total_tracks: usize,
    pub matched_tracks: usize,
    pub missing_tracks: usize,
    /// Basenames of the first unresolved entries.
    pub missing_preview: Vec<String>,
    /// Unresolved entries beyond the preview.
    pub missing_overflow: usize,
    pub playlist_written: bool,
}

pub struct SyncEngine<'a> {
    source: &'a dyn SourceLibrary,
    managed: &'a dyn ManagedLibrary,
    change_log: &'a ChangeLog,
    skip_policy: SkipPolicy,
    observer: Box<dyn SyncObserver + 'a>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        source: &'a dyn SourceLibrary,
        managed: &'a dyn ManagedLibrary,
        change_log: &'a ChangeLog,
    ) -> Self {
        Self {
            source,
            managed,
            change_log,
            skip_policy: SkipPolicy::default(),
            observer: Box::new(NoopObserver),
        }
    }

    pub fn with_skip_policy(mut self, skip_policy: SkipPolicy) -> Self {
        self.skip_policy = skip_policy;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn SyncObserver + 'a>) -> Self {
        self.observer = observer;
        self
    }

    pub fn source(&self) -> &'a dyn SourceLibrary {
        self.source
    }

    pub fn managed(&self) -> &'a dyn ManagedLibrary {
        self.managed
    }

    /// Runs the clean pipeline over the tracks selected by `scope`.
    ///
    /// Fails only when enumeration fails; per-track problems are counted.
    pub fn clean(&mut self, scope: &CleanScope) -> Result<SyncStats, String> {
        info!("Starting {scope} clean...");
        let (catalog, tracks) = scope.enumerate(self.source, self.managed)?;
        let stats = self.clean_tracks(&catalog, &tracks);
        info!(
            "Clean of {} complete. Updated {} of {} tracks.",
            scope, stats.updated_tracks, stats.total_tracks
        );
        Ok(stats)
    }

    /// Runs the pipeline over tracks the caller already enumerated.
    pub fn clean_tracks(&mut self, catalog: &SourceCatalog, tracks: &[ManagedTrack]) -> SyncStats {
        let cleaned = match self.skip_policy {
            SkipPolicy::Track => self.load_cleaned_identities(),
            SkipPolicy::Field => BTreeSet::new(),
        };

        let mut stats = SyncStats {
            total_tracks: tracks.len(),
            ..SyncStats::default()
        };
        for track in tracks {
            let outcome = self.clean_track(track, catalog, &cleaned);
            stats.record(&outcome);
            self.observer.track_processed(track, &outcome);
        }
        stats
    }

    fn load_cleaned_identities(&self) -> BTreeSet<TrackIdentity> {
        self.change_log.cleaned_identities().unwrap_or_else(|err| {
            warn!("Failed to load cleaned tracks, revisiting all tracks: {err}");
            BTreeSet::new()
        })
    }

    fn field_already_cleaned(&self, change: &FieldChange) -> bool {
        self.change_log
            .is_field_cleaned(&change.identity, change.field)
            .unwrap_or_else(|err| {
                warn!(
                    "Failed to check cleaned state of {} for track {}: {err}",
                    change.field, change.identity
                );
                false
            })
    }

    fn clean_track(
        &mut self,
        track: &ManagedTrack,
        catalog: &SourceCatalog,
        cleaned: &BTreeSet<TrackIdentity>,
    ) -> TrackOutcome {
        if cleaned.contains(&track.identity) {
            return TrackOutcome::Skipped;
        }
        let Some(matched) = resolver::resolve_source_track(track, catalog) else {
            debug!("No source match for track {}", track.identity);
            return TrackOutcome::NoMatch;
        };
        debug!(
            "Matched track {} to {} ({:?})",
            track.identity, matched.track.path, matched.tier
        );

        let changes: Vec<FieldChange> = differ::diff_track(track, matched.track)
            .into_iter()
            .filter(|change| !self.field_already_cleaned(change))
            .collect();
        if changes.is_empty() {
            return TrackOutcome::MatchedNoChange;
        }

        let mut update = MetadataUpdate::default();
        for change in &changes {
            info!(
                "Updating {} for track {}: '{}' -> '{}'",
                change.field, change.identity, change.old_value, change.new_value
            );
            let slot = match change.field {
                MetadataField::Title => &mut update.title,
                MetadataField::Artist => &mut update.artist,
                MetadataField::Album => &mut update.album,
            };
            *slot = Some(change.new_value.clone());
        }

        // Write first, then log: a crash in between re-applies the same values next run.
        if let Err(err) = self.managed.update_track_metadata(track, &update) {
            warn!("Write rejected for track {}: {err}", track.identity);
            return TrackOutcome::UpdateRejected;
        }
        for change in &changes {
            if let Err(err) = self.change_log.record_change(
                &change.identity,
                change.field,
                &change.old_value,
                &change.new_value,
            ) {
                warn!(
                    "Failed to record {} change for track {}: {err}",
                    change.field, change.identity
                );
            }
            self.observer.change_applied(change);
        }

        TrackOutcome::Updated {
            fields: changes.iter().map(|change| change.field).collect(),
        }
    }

    /// Replaces the managed playlist `playlist_name` with the resolved tracks
    /// of the source playlist, in source order. Unresolved entries are dropped.
    pub fn sync_playlist(
        &mut self,
        playlist_name: &str,
        missing_preview_limit: usize,
    ) -> Result<PlaylistSyncReport, String> {
        info!("Starting sync for playlist: {playlist_name}");
        let source_paths = self.source.get_playlist_tracks(playlist_name)?;

        let mut resolved = Vec::new();
        let mut missing = Vec::new();
        for path in &source_paths {
            match resolver::find_managed_track_by_filename(self.managed, path) {
                Some(track) => resolved.push(track),
                None => missing.push(path.as_str()),
            }
        }

        let mut report = PlaylistSyncReport {
            total_tracks: source_paths.len(),
            matched_tracks: resolved.len(),
            missing_tracks: missing.len(),
            missing_preview: missing
                .iter()
                .take(missing_preview_limit)
                .map(|path| path_normalizer::basename(path).to_string())
                .collect(),
            missing_overflow: missing.len().saturating_sub(missing_preview_limit),
            playlist_written: false,
        };

        if resolved.is_empty() {
            error!("No matching tracks found for playlist '{playlist_name}'");
        } else {
            match self.managed.create_playlist(playlist_name, &resolved) {
                Ok(()) => {
                    info!(
                        "Created playlist '{}' with {} tracks",
                        playlist_name,
                        resolved.len()
                    );
                    report.playlist_written = true;
                }
                Err(err) => error!("Failed to create playlist '{playlist_name}': {err}"),
            }
        }

        if !missing.is_empty() {
            warn!("Could not find {} tracks in Plex:", missing.len());
            for name in &report.missing_preview {
                warn!("  - {name}");
            }
            if report.missing_overflow > 0 {
                warn!("  ... and {} more", report.missing_overflow);
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{managed_track, source_track, FakeManagedLibrary, FakeSourceLibrary};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordingObserver {
        outcomes: Rc<RefCell<Vec<(String, TrackOutcome)>>>,
        changes: Rc<RefCell<Vec<FieldChange>>>,
    }

    impl SyncObserver for RecordingObserver {
        fn track_processed(&mut self, track: &ManagedTrack, outcome: &TrackOutcome) {
            self.outcomes
                .borrow_mut()
                .push((track.identity.to_string(), outcome.clone()));
        }

        fn change_applied(&mut self, change: &FieldChange) {
            self.changes.borrow_mut().push(change.clone());
        }
    }

    fn scenario_one() -> (FakeSourceLibrary, FakeManagedLibrary) {
        let source = FakeSourceLibrary::new(vec![source_track("/music/a.mp3", "X", "Y", "Z")]);
        let managed = FakeManagedLibrary::new(vec![managed_track(
            "1",
            "Old",
            "Y",
            "Z",
            "/mnt/music/a.mp3",
        )]);
        (source, managed)
    }

    #[test]
    fn test_basename_match_updates_only_title() {
        let (source, managed) = scenario_one();
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");

        let stats = SyncEngine::new(&source, &managed, &log)
            .clean(&CleanScope::All)
            .expect("clean should succeed");

        assert_eq!(stats.total_tracks, 1);
        assert_eq!(stats.matched_tracks, 1);
        assert_eq!(stats.updated_tracks, 1);
        assert_eq!(stats.title_updates, 1);
        assert_eq!(stats.artist_updates, 0);
        assert_eq!(stats.album_updates, 0);

        let updates = managed.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.title.as_deref(), Some("X"));
        assert_eq!(updates[0].1.artist, None);
        assert_eq!(updates[0].1.album, None);

        let entries = log
            .entries_for(&TrackIdentity::new("1"))
            .expect("entries should load");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field, MetadataField::Title);
        assert_eq!(entries[0].old_value, "Old");
        assert_eq!(entries[0].new_value, "X");
    }

    #[test]
    fn test_rerun_skips_cleaned_track() {
        let (source, managed) = scenario_one();
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");
        SyncEngine::new(&source, &managed, &log)
            .clean(&CleanScope::All)
            .expect("first clean should succeed");

        let stats = SyncEngine::new(&source, &managed, &log)
            .clean(&CleanScope::All)
            .expect("second clean should succeed");
        assert_eq!(stats.skipped_tracks, 1);
        assert_eq!(stats.updated_tracks, 0);
        assert_eq!(log.stats().expect("stats should load").total_changes, 1);
        assert_eq!(managed.updates().len(), 1);
    }

    #[test]
    fn test_track_policy_skips_untouched_fields_of_cleaned_track() {
        let (source, managed) = scenario_one();
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");
        SyncEngine::new(&source, &managed, &log)
            .clean(&CleanScope::All)
            .expect("first clean should succeed");

        managed.set_album("1", "Z (Remaster)");
        let stats = SyncEngine::new(&source, &managed, &log)
            .clean(&CleanScope::All)
            .expect("second clean should succeed");
        assert_eq!(stats.skipped_tracks, 1);
        assert_eq!(stats.album_updates, 0);
    }

    #[test]
    fn test_field_policy_revisits_track_but_not_cleaned_fields() {
        let (source, managed) = scenario_one();
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");
        SyncEngine::new(&source, &managed, &log)
            .clean(&CleanScope::All)
            .expect("first clean should succeed");

        managed.set_album("1", "Z (Remaster)");
        managed.set_title("1", "Edited Again");
        let stats = SyncEngine::new(&source, &managed, &log)
            .with_skip_policy(SkipPolicy::Field)
            .clean(&CleanScope::All)
            .expect("second clean should succeed");

        assert_eq!(stats.skipped_tracks, 0);
        assert_eq!(stats.updated_tracks, 1);
        assert_eq!(stats.album_updates, 1);
        assert_eq!(stats.title_updates, 0);
        let last_update = managed.updates().pop().expect("an update should be sent");
        assert_eq!(last_update.1.title, None);
        assert_eq!(last_update.1.album.as_deref(), Some("Z"));
    }

    #[test]
    fn test_rejected_write_is_counted_and_not_logged() {
        let (source, managed) = scenario_one();
        managed.reject_updates(true);
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");

        let stats = SyncEngine::new(&source, &managed, &log)
            .clean(&CleanScope::All)
            .expect("clean should succeed");
        assert_eq!(stats.failed_updates, 1);
        assert_eq!(stats.updated_tracks, 0);
        assert_eq!(stats.matched_tracks, 1);
        assert!(log
            .cleaned_identities()
            .expect("identities should load")
            .is_empty());

        managed.reject_updates(false);
        let retry = SyncEngine::new(&source, &managed, &log)
            .clean(&CleanScope::All)
            .expect("retry should succeed");
        assert_eq!(retry.updated_tracks, 1);
    }

    #[test]
    fn test_change_log_failures_do_not_stop_the_run() {
        let (source, managed) = scenario_one();
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");
        log.drop_storage().expect("table should drop");
        let observer = RecordingObserver::default();
        let outcomes = Rc::clone(&observer.outcomes);
        let changes = Rc::clone(&observer.changes);

        let stats = SyncEngine::new(&source, &managed, &log)
            .with_observer(Box::new(observer))
            .clean(&CleanScope::All)
            .expect("clean should succeed without a working log");

        assert_eq!(stats.updated_tracks, 1);
        assert_eq!(stats.title_updates, 1);
        assert_eq!(stats.skipped_tracks, 0);
        assert_eq!(managed.updates().len(), 1);
        assert_eq!(
            *outcomes.borrow(),
            vec![(
                "1".to_string(),
                TrackOutcome::Updated {
                    fields: vec![MetadataField::Title]
                }
            )]
        );
        assert_eq!(changes.borrow().len(), 1);
    }

    #[test]
    fn test_field_policy_survives_change_log_failure() {
        let (source, managed) = scenario_one();
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");
        log.drop_storage().expect("table should drop");

        let stats = SyncEngine::new(&source, &managed, &log)
            .with_skip_policy(SkipPolicy::Field)
            .clean(&CleanScope::All)
            .expect("clean should succeed without a working log");
        assert_eq!(stats.updated_tracks, 1);
        assert_eq!(stats.failed_updates, 0);
    }

    #[test]
    fn test_blank_artist_scope_is_rejected() {
        let (source, managed) = scenario_one();
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");

        for blank in ["", "   "] {
            let result = SyncEngine::new(&source, &managed, &log)
                .clean(&CleanScope::Artist(blank.to_string()));
            assert!(result.is_err(), "artist query {blank:?} should be rejected");
        }
        assert!(managed.updates().is_empty());
    }

    #[test]
    fn test_clean_tracks_uses_only_given_tracks() {
        let source = FakeSourceLibrary::new(vec![
            source_track("/music/a.mp3", "A", "Artist", "Album"),
            source_track("/music/b.mp3", "B", "Artist", "Album"),
        ]);
        let managed = FakeManagedLibrary::new(vec![
            managed_track("1", "a", "Artist", "Album", "/srv/a.mp3"),
            managed_track("2", "b", "Artist", "Album", "/srv/b.mp3"),
        ]);
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");
        let catalog = source.get_all_tracks().expect("catalog should load");
        let selected = managed.get_all_tracks().expect("tracks should load");

        let stats = SyncEngine::new(&source, &managed, &log).clean_tracks(&catalog, &selected[1..]);
        assert_eq!(stats.total_tracks, 1);
        assert_eq!(stats.updated_tracks, 1);
        let updates = managed.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0.as_str(), "2");
    }

    #[test]
    fn test_outcomes_are_reported_to_observer() {
        let source = FakeSourceLibrary::new(vec![
            source_track("/music/a.mp3", "A", "Artist", "Album"),
            source_track("/music/b.mp3", "B", "Artist", "Album"),
        ]);
        let managed = FakeManagedLibrary::new(vec![
            managed_track("1", "A", "Artist", "Album", "/srv/a.mp3"),
            managed_track("2", "b", "Artist", "Album", "/srv/b.mp3"),
            managed_track("3", "C", "Artist", "Album", "/srv/c.mp3"),
        ]);
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");
        let observer = RecordingObserver::default();
        let outcomes = Rc::clone(&observer.outcomes);
        let changes = Rc::clone(&observer.changes);

        let stats = SyncEngine::new(&source, &managed, &log)
            .with_observer(Box::new(observer))
            .clean(&CleanScope::All)
            .expect("clean should succeed");

        assert_eq!(
            *outcomes.borrow(),
            vec![
                ("1".to_string(), TrackOutcome::MatchedNoChange),
                (
                    "2".to_string(),
                    TrackOutcome::Updated {
                        fields: vec![MetadataField::Title]
                    }
                ),
                ("3".to_string(), TrackOutcome::NoMatch),
            ]
        );
        assert_eq!(changes.borrow().len(), 1);
        assert_eq!(stats.unmatched_tracks, 1);
        assert_eq!(stats.matched_tracks, 2);
    }

    #[test]
    fn test_artist_scope_filters_both_libraries() {
        let source = FakeSourceLibrary::new(vec![
            source_track("/music/a.mp3", "A", "Portishead", "Dummy"),
            source_track("/music/b.mp3", "B", "Radiohead", "Kid A"),
        ]);
        let managed = FakeManagedLibrary::new(vec![
            managed_track("1", "a", "Portishead", "Dummy", "/srv/a.mp3"),
            managed_track("2", "b", "Radiohead", "Kid A", "/srv/b.mp3"),
        ]);
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");

        let stats = SyncEngine::new(&source, &managed, &log)
            .clean(&CleanScope::Artist("PORTIS".to_string()))
            .expect("clean should succeed");
        assert_eq!(stats.total_tracks, 1);
        assert_eq!(stats.updated_tracks, 1);
        let updates = managed.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0.as_str(), "1");
    }

    #[test]
    fn test_playlist_sync_keeps_source_order_and_drops_missing() {
        let mut source = FakeSourceLibrary::new(Vec::new());
        source.add_playlist(
            "Road Trip",
            vec![
                "/music/c.mp3".to_string(),
                "/music/missing.mp3".to_string(),
                "/music/a.mp3".to_string(),
            ],
        );
        let managed = FakeManagedLibrary::new(vec![
            managed_track("1", "a", "Artist", "Album", "/srv/a.mp3"),
            managed_track("3", "c", "Artist", "Album", "/srv/c.mp3"),
        ]);
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");

        let report = SyncEngine::new(&source, &managed, &log)
            .sync_playlist("Road Trip", 10)
            .expect("sync should succeed");

        assert_eq!(report.total_tracks, 3);
        assert_eq!(report.matched_tracks, 2);
        assert_eq!(report.missing_tracks, 1);
        assert_eq!(report.missing_preview, vec!["missing.mp3".to_string()]);
        assert_eq!(report.missing_overflow, 0);
        assert!(report.playlist_written);

        let playlists = managed.playlists();
        assert_eq!(playlists.len(), 1);
        assert_eq!(playlists[0].0, "Road Trip");
        let members: Vec<&str> = playlists[0].1.iter().map(TrackIdentity::as_str).collect();
        assert_eq!(members, vec!["3", "1"]);
    }

    #[test]
    fn test_playlist_sync_bounds_missing_preview() {
        let mut source = FakeSourceLibrary::new(Vec::new());
        source.add_playlist(
            "Unknowns",
            (0..5).map(|index| format!("/music/gone{index}.mp3")).collect(),
        );
        let managed = FakeManagedLibrary::new(Vec::new());
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");

        let report = SyncEngine::new(&source, &managed, &log)
            .sync_playlist("Unknowns", 2)
            .expect("sync should succeed");

        assert_eq!(report.missing_tracks, 5);
        assert_eq!(
            report.missing_preview,
            vec!["gone0.mp3".to_string(), "gone1.mp3".to_string()]
        );
        assert_eq!(report.missing_overflow, 3);
        assert!(!report.playlist_written);
        assert!(managed.playlists().is_empty());
    }
}
