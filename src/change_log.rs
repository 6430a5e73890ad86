//! Durable, append-only log of applied metadata changes.
//!
//! The log is the only state that survives between runs: a field recorded here
//! has already been synchronized and is not rewritten by later runs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::Local;
use rusqlite::{params, Connection};

use crate::catalog::{MetadataField, TrackIdentity};

/// One recorded field mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    pub identity: TrackIdentity,
    pub field: MetadataField,
    pub old_value: String,
    pub new_value: String,
    pub timestamp: String,
}

/// Aggregate counts over the whole log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeLogStats {
    pub total_changes: u64,
    pub tracks_changed: u64,
    pub per_field: BTreeMap<String, u64>,
}

pub struct ChangeLog {
    conn: Connection,
}

impl ChangeLog {
    /// Opens (or creates) the log database at `path`.
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let change_log = Self { conn };
        change_log.initialize_schema()?;
        Ok(change_log)
    }

    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let change_log = Self { conn };
        change_log.initialize_schema()?;
        Ok(change_log)
    }

    /// Drops the backing table so every later call fails.
    #[cfg(test)]
    pub fn drop_storage(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch("DROP TABLE cleaned")
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS cleaned (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plex_rating_key TEXT NOT NULL,
                field TEXT NOT NULL,
                old_value TEXT,
                new_value TEXT,
                timestamp TEXT NOT NULL
            )",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cleaned_key_field
                ON cleaned (plex_rating_key, field)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cleaned_key ON cleaned (plex_rating_key)",
            [],
        )?;
        Ok(())
    }

    /// Appends a change entry stamped with the current local time.
    ///
    /// Never deduplicates; callers check [`ChangeLog::is_field_cleaned`] first.
    pub fn record_change(
        &self,
        identity: &TrackIdentity,
        field: MetadataField,
        old_value: &str,
        new_value: &str,
    ) -> Result<(), rusqlite::Error> {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
        self.conn.execute(
            "INSERT INTO cleaned (plex_rating_key, field, old_value, new_value, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![identity.as_str(), field.as_str(), old_value, new_value, timestamp],
        )?;
        Ok(())
    }

    /// True iff any entry exists for `(identity, field)`, whatever its value.
    pub fn is_field_cleaned(
        &self,
        identity: &TrackIdentity,
        field: MetadataField,
    ) -> Result<bool, rusqlite::Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM cleaned WHERE plex_rating_key = ?1 AND field = ?2",
            params![identity.as_str(), field.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Every identity with at least one entry.
    pub fn cleaned_identities(&self) -> Result<BTreeSet<TrackIdentity>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT plex_rating_key FROM cleaned")?;
        let keys = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut identities = BTreeSet::new();
        for key in keys {
            identities.insert(TrackIdentity::new(key?));
        }
        Ok(identities)
    }

    pub fn stats(&self) -> Result<ChangeLogStats, rusqlite::Error> {
        let total_changes: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cleaned", [], |row| row.get(0))?;
        let tracks_changed: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT plex_rating_key) FROM cleaned",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = self
            .conn
            .prepare("SELECT field, COUNT(*) FROM cleaned GROUP BY field")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut per_field = BTreeMap::new();
        for row in rows {
            let (field, count) = row?;
            per_field.insert(field, count as u64);
        }

        Ok(ChangeLogStats {
            total_changes: total_changes as u64,
            tracks_changed: tracks_changed as u64,
            per_field,
        })
    }

    /// All entries for one identity, oldest first.
    pub fn entries_for(&self, identity: &TrackIdentity) -> Result<Vec<ChangeEntry>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT plex_rating_key, field, old_value, new_value, timestamp
             FROM cleaned WHERE plex_rating_key = ?1 ORDER BY id ASC",
        )?;
        let entry_iter = stmt.query_map(params![identity.as_str()], |row| {
            let field_name: String = row.get(1)?;
            let field = MetadataField::parse(&field_name).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    format!("unknown metadata field '{field_name}'").into(),
                )
            })?;
            Ok(ChangeEntry {
                identity: TrackIdentity::new(row.get::<_, String>(0)?),
                field,
                old_value: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                new_value: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                timestamp: row.get(4)?,
            })
        })?;

        let mut entries = Vec::new();
        for entry in entry_iter {
            entries.push(entry?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_db_path(name: &str) -> std::path::PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be valid")
            .as_nanos();
        std::env::temp_dir().join(format!("tunesync_{name}_{nonce}.db"))
    }

    #[test]
    fn test_record_then_field_is_cleaned() {
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");
        let identity = TrackIdentity::new("100");

        assert!(!log
            .is_field_cleaned(&identity, MetadataField::Title)
            .expect("query should succeed"));
        log.record_change(&identity, MetadataField::Title, "Old", "New")
            .expect("record should succeed");

        assert!(log
            .is_field_cleaned(&identity, MetadataField::Title)
            .expect("query should succeed"));
        assert!(!log
            .is_field_cleaned(&identity, MetadataField::Album)
            .expect("query should succeed"));
    }

    #[test]
    fn test_record_change_appends_duplicates() {
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");
        let identity = TrackIdentity::new("7");
        log.record_change(&identity, MetadataField::Artist, "a", "b")
            .expect("record should succeed");
        log.record_change(&identity, MetadataField::Artist, "a", "b")
            .expect("record should succeed");

        let entries = log.entries_for(&identity).expect("entries should load");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].field, MetadataField::Artist);
        assert_eq!(entries[0].old_value, "a");
        assert_eq!(entries[0].new_value, "b");
        assert!(!entries[0].timestamp.is_empty());
    }

    #[test]
    fn test_cleaned_identities_and_stats() {
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");
        let first = TrackIdentity::new("1");
        let second = TrackIdentity::new("2");
        log.record_change(&first, MetadataField::Title, "", "T")
            .expect("record should succeed");
        log.record_change(&first, MetadataField::Album, "", "A")
            .expect("record should succeed");
        log.record_change(&second, MetadataField::Title, "x", "y")
            .expect("record should succeed");

        let identities = log.cleaned_identities().expect("identities should load");
        assert_eq!(
            identities.into_iter().collect::<Vec<_>>(),
            vec![first, second]
        );

        let stats = log.stats().expect("stats should load");
        assert_eq!(stats.total_changes, 3);
        assert_eq!(stats.tracks_changed, 2);
        assert_eq!(stats.per_field.get("title"), Some(&2));
        assert_eq!(stats.per_field.get("album"), Some(&1));
        assert_eq!(stats.per_field.get("artist"), None);
    }

    #[test]
    fn test_entries_with_unknown_field_fail_to_load() {
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");
        log.conn
            .execute(
                "INSERT INTO cleaned (plex_rating_key, field, old_value, new_value, timestamp)
                 VALUES ('3', 'genre', 'Rock', 'Pop', '2024-01-01T00:00:00')",
                [],
            )
            .expect("raw insert should succeed");

        assert!(log.entries_for(&TrackIdentity::new("3")).is_err());
    }

    #[test]
    fn test_dropped_storage_makes_every_call_fail() {
        let log = ChangeLog::new_in_memory().expect("failed to create in-memory log");
        let identity = TrackIdentity::new("1");
        log.drop_storage().expect("table should drop");

        assert!(log.cleaned_identities().is_err());
        assert!(log.is_field_cleaned(&identity, MetadataField::Title).is_err());
        assert!(log
            .record_change(&identity, MetadataField::Title, "a", "b")
            .is_err());
    }

    #[test]
    fn test_log_survives_reopen() {
        let path = unique_temp_db_path("reopen");
        let identity = TrackIdentity::new("55");
        {
            let log = ChangeLog::open(&path).expect("log should open");
            log.record_change(&identity, MetadataField::Title, "a", "b")
                .expect("record should succeed");
        }

        let reopened = ChangeLog::open(&path).expect("log should reopen");
        assert!(reopened
            .is_field_cleaned(&identity, MetadataField::Title)
            .expect("query should succeed"));
        assert_eq!(reopened.stats().expect("stats should load").total_changes, 1);

        drop(reopened);
        std::fs::remove_file(path).expect("db should be removable");
    }
}
