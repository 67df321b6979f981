//! Local SQLite library of imported platform snapshots.
//!
//! Importing a snapshot keeps a history of plays across exports, so the
//! ranking can see more than the platform's short recently-played window.
//! The library serves the same three collections as a snapshot file through
//! [`TrackSource`].

use crate::algorithm::Timeframe;
use crate::source::{Snapshot, TrackSource};
use crate::track::{PrimaryRecord, SavedRecord, Track};
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use log::{debug, info, warn};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tracks (
        id      TEXT PRIMARY KEY,
        payload TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS plays (
        seq       INTEGER PRIMARY KEY,
        track_id  TEXT NOT NULL REFERENCES tracks(id),
        played_at TEXT,
        shape     TEXT NOT NULL,
        UNIQUE(track_id, played_at)
    );
    CREATE TABLE IF NOT EXISTS saved (
        seq      INTEGER PRIMARY KEY,
        track_id TEXT NOT NULL UNIQUE REFERENCES tracks(id),
        added_at TEXT
    );
    CREATE TABLE IF NOT EXISTS top_ranks (
        timeframe TEXT NOT NULL,
        rank      INTEGER NOT NULL,
        track_id  TEXT NOT NULL REFERENCES tracks(id),
        PRIMARY KEY (timeframe, rank)
    );
    CREATE INDEX IF NOT EXISTS idx_plays_played_at ON plays(played_at);
";

/// How a stored play was observed.
const SHAPE_HISTORY: &str = "history";
const SHAPE_CURRENT: &str = "current";
const SHAPE_BARE: &str = "bare";

/// Row counts reported by `trackrank stats` and by imports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibraryStats {
    pub tracks: usize,
    pub plays: usize,
    pub saved: usize,
    pub short_term: usize,
    pub medium_term: usize,
    pub long_term: usize,
}

/// What one import changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub plays_added: usize,
    pub saved_added: usize,
    pub windows_replaced: usize,
    pub skipped: usize,
}

/// Handle on the library database.
#[derive(Debug)]
pub struct LibraryDb {
    conn: Connection,
}

impl LibraryDb {
    /// Open (and create if needed) the library at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or the schema cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open library database {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// A throwaway library, used by tests and benchmarks.
    ///
    /// # Errors
    ///
    /// Fails when SQLite cannot create the schema.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create library schema")?;
        Ok(Self { conn })
    }

    /// Remove every stored record.
    ///
    /// # Errors
    ///
    /// Propagates SQL errors.
    pub fn clear(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                "DELETE FROM plays; DELETE FROM saved; DELETE FROM top_ranks; DELETE FROM tracks;",
            )
            .context("Failed to clear library")?;
        info!("Cleared library");
        Ok(())
    }

    /// Merge a snapshot into the library.
    ///
    /// Importing the same snapshot twice leaves the library unchanged. The
    /// merge rules are:
    ///
    /// - Timestamped plays are deduplicated on `(track, played_at)`
    /// - Plays without a timestamp describe the moment of export, so they
    ///   replace the ones from earlier imports; a snapshot without plays
    ///   keeps them
    /// - Saved tracks are deduplicated by id
    /// - Each non-empty top list replaces the stored list for its window
    /// - Malformed play records are skipped with a warning and counted in
    ///   [`ImportSummary::skipped`]
    /// - A track's stored payload is the first one the snapshot carries for
    ///   it, replacing any payload from earlier imports
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The transaction cannot be started or committed
    /// - A track payload cannot be encoded as JSON
    /// - Any insert or delete fails
    ///
    /// The import runs in one transaction, so nothing is written on error.
    ///
    /// # Examples
    ///
    /// ```
    /// use trackrank::db::LibraryDb;
    /// use trackrank::source::Snapshot;
    /// use trackrank::track::{PrimaryRecord, Track};
    ///
    /// let snapshot = Snapshot {
    ///     recently_played: vec![
    ///         PrimaryRecord::now_playing(Track::new("a")),
    ///         PrimaryRecord::Malformed(serde_json::json!({"unexpected": "shape"})),
    ///     ],
    ///     ..Default::default()
    /// };
    /// let mut db = LibraryDb::open_in_memory()?;
    ///
    /// let summary = db.import_snapshot(&snapshot)?;
    /// assert_eq!((summary.plays_added, summary.skipped), (1, 1));
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn import_snapshot(&mut self, snapshot: &Snapshot) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let tx = self.conn.transaction()?;

        {
            let mut upsert_track = tx.prepare(
                "INSERT INTO tracks (id, payload) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
            )?;
            // Within one import the first payload seen for an id wins.
            let mut stored = HashSet::new();
            let mut store_track = |track: &Track| -> Result<()> {
                if !stored.insert(track.id.clone()) {
                    return Ok(());
                }
                let payload = serde_json::to_string(track)
                    .with_context(|| format!("Failed to encode track `{}'", track.id))?;
                upsert_track
                    .execute(params![track.id, payload])
                    .with_context(|| format!("Failed to store track `{}'", track.id))?;
                Ok(())
            };

            if !snapshot.recently_played.is_empty() {
                tx.execute("DELETE FROM plays WHERE played_at IS NULL", [])?;
            }
            let mut insert_play = tx.prepare(
                "INSERT OR IGNORE INTO plays (track_id, played_at, shape) VALUES (?1, ?2, ?3)",
            )?;
            for record in &snapshot.recently_played {
                let (track, played_at, shape) = match record {
                    PrimaryRecord::TimestampedPlay { track, played_at } => {
                        (track, Some(encode_time(played_at)), SHAPE_HISTORY)
                    }
                    PrimaryRecord::UntimestampedPlay { track } => (track, None, SHAPE_CURRENT),
                    PrimaryRecord::BareTrack(track) => (track, None, SHAPE_BARE),
                    PrimaryRecord::Malformed(raw) => {
                        warn!("Not importing play record with unknown structure: {raw}");
                        summary.skipped += 1;
                        continue;
                    }
                };
                store_track(track)?;
                summary.plays_added += insert_play.execute(params![track.id, played_at, shape])?;
            }

            let mut insert_saved = tx.prepare(
                "INSERT OR IGNORE INTO saved (track_id, added_at) VALUES (?1, ?2)",
            )?;
            for SavedRecord { track, added_at } in &snapshot.saved_tracks {
                store_track(track)?;
                summary.saved_added +=
                    insert_saved.execute(params![track.id, added_at.as_ref().map(encode_time)])?;
            }

            let mut insert_rank = tx.prepare(
                "INSERT INTO top_ranks (timeframe, rank, track_id) VALUES (?1, ?2, ?3)",
            )?;
            for timeframe in Timeframe::ALL {
                let Some(tracks) = snapshot.top_tracks.window(timeframe) else {
                    continue;
                };
                if tracks.is_empty() {
                    continue;
                }
                tx.execute(
                    "DELETE FROM top_ranks WHERE timeframe = ?1",
                    [timeframe.as_str()],
                )?;
                for (rank, track) in tracks.iter().enumerate() {
                    store_track(track)?;
                    insert_rank.execute(params![timeframe.as_str(), to_sql_int(rank), track.id])?;
                }
                summary.windows_replaced += 1;
            }
        }

        tx.commit().context("Committing snapshot import failed")?;
        debug!("Imported snapshot: {summary:?}");
        Ok(summary)
    }

    /// Row counts per table and window.
    ///
    /// # Errors
    ///
    /// Propagates SQL errors.
    pub fn stats(&self) -> Result<LibraryStats> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(sql, [], |row| row.get(0))
                .with_context(|| format!("Failed to run `{sql}'"))?;
            Ok(usize::try_from(n).unwrap_or_default())
        };
        let window = |timeframe: Timeframe| -> Result<usize> {
            let n: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM top_ranks WHERE timeframe = ?1",
                [timeframe.as_str()],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(n).unwrap_or_default())
        };

        Ok(LibraryStats {
            tracks: count("SELECT COUNT(*) FROM tracks")?,
            plays: count("SELECT COUNT(*) FROM plays")?,
            saved: count("SELECT COUNT(*) FROM saved")?,
            short_term: window(Timeframe::ShortTerm)?,
            medium_term: window(Timeframe::MediumTerm)?,
            long_term: window(Timeframe::LongTerm)?,
        })
    }
}

impl TrackSource for LibraryDb {
    fn fetch_recent_plays(&self, limit: usize) -> Result<Vec<PrimaryRecord>> {
        // Untimestamped plays stand for "now" and come first, then newest first.
        let mut stmt = self.conn.prepare(
            "SELECT t.payload, p.played_at, p.shape
             FROM plays p JOIN tracks t ON t.id = p.track_id
             ORDER BY p.played_at IS NOT NULL, p.played_at DESC, p.seq
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([to_sql_int(limit)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("Cannot query plays.")?;

        let mut records = Vec::new();
        for row in rows {
            let (payload, played_at, shape) = row.context("Queried play unwrap failed.")?;
            let track = decode_track(&payload)?;
            records.push(match (played_at, shape.as_str()) {
                (Some(played_at), _) => PrimaryRecord::played(track, decode_time(&played_at)?),
                (None, SHAPE_CURRENT) => PrimaryRecord::now_playing(track),
                (None, _) => PrimaryRecord::BareTrack(track),
            });
        }
        Ok(records)
    }

    fn fetch_windowed_top(&self, limit: usize, timeframe: Timeframe) -> Result<Vec<Track>> {
        anyhow::ensure!(
            timeframe != Timeframe::Recent,
            "The platform has no windowed top list for `{timeframe}'"
        );
        let mut stmt = self.conn.prepare(
            "SELECT t.payload
             FROM top_ranks r JOIN tracks t ON t.id = r.track_id
             WHERE r.timeframe = ?1
             ORDER BY r.rank
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![timeframe.as_str(), to_sql_int(limit)], |row| {
                row.get::<_, String>(0)
            })
            .context("Cannot query top tracks.")?;

        let mut tracks = Vec::new();
        for payload in rows {
            tracks.push(decode_track(&payload?)?);
        }
        Ok(tracks)
    }

    fn fetch_saved(&self, limit: usize) -> Result<Vec<SavedRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.payload, s.added_at
             FROM saved s JOIN tracks t ON t.id = s.track_id
             ORDER BY s.added_at IS NULL, s.added_at DESC, s.seq
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([to_sql_int(limit)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .context("Cannot query saved tracks.")?;

        let mut records = Vec::new();
        for row in rows {
            let (payload, added_at) = row?;
            records.push(SavedRecord {
                track: decode_track(&payload)?,
                added_at: added_at.as_deref().map(decode_time).transpose()?,
            });
        }
        Ok(records)
    }
}

/// UTC with fixed precision, so stored timestamps sort as text.
fn encode_time(at: &DateTime<FixedOffset>) -> String {
    at.with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn decode_time(raw: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).with_context(|| format!("Invalid stored timestamp `{raw}'"))
}

fn decode_track(payload: &str) -> Result<Track> {
    serde_json::from_str(payload).context("Invalid stored track payload")
}

fn to_sql_int(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TopTracks;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, day, hour, 0, 0)
            .unwrap()
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            recently_played: vec![
                PrimaryRecord::now_playing(Track::named("a", "Song A")),
                PrimaryRecord::played(Track::new("b"), at(2, 9)),
                PrimaryRecord::played(Track::new("a"), at(1, 22)),
                PrimaryRecord::Malformed(serde_json::json!({"x": 1})),
            ],
            top_tracks: TopTracks {
                short_term: vec![Track::new("c"), Track::new("a")],
                ..Default::default()
            },
            saved_tracks: vec![SavedRecord::new(Track::new("b"))],
        }
    }

    #[test]
    fn test_import_and_fetch() -> Result<()> {
        let mut db = LibraryDb::open_in_memory()?;
        let summary = db.import_snapshot(&snapshot())?;
        assert_eq!(
            summary,
            ImportSummary {
                plays_added: 3,
                saved_added: 1,
                windows_replaced: 1,
                skipped: 1
            }
        );

        let plays = db.fetch_recent_plays(10)?;
        assert_eq!(plays.len(), 3);
        assert_eq!(plays[0], PrimaryRecord::now_playing(Track::named("a", "Song A")));
        match &plays[1] {
            PrimaryRecord::TimestampedPlay { track, played_at } => {
                assert_eq!(track.id, "b");
                assert_eq!(*played_at, at(2, 9));
            }
            other => panic!("expected the newest history entry, got {other:?}"),
        }

        let top = db.fetch_windowed_top(10, Timeframe::ShortTerm)?;
        let ids: Vec<_> = top.iter().map(|track| track.id.as_str()).collect();
        assert_eq!(ids, ["c", "a"]);
        assert!(db.fetch_windowed_top(10, Timeframe::LongTerm)?.is_empty());
        assert!(db.fetch_windowed_top(10, Timeframe::Recent).is_err());

        assert_eq!(db.fetch_saved(10)?[0].track.id, "b");
        Ok(())
    }

    #[test]
    fn test_reimport_is_idempotent_for_history() -> Result<()> {
        let mut db = LibraryDb::open_in_memory()?;
        db.import_snapshot(&snapshot())?;
        let again = db.import_snapshot(&snapshot())?;

        // Only the "currently playing" entry is re-added.
        assert_eq!(again.plays_added, 1);
        assert_eq!(again.saved_added, 0);
        let stats = db.stats()?;
        assert_eq!(stats.plays, 3);
        assert_eq!(stats.saved, 1);
        assert_eq!(stats.tracks, 3);
        assert_eq!(stats.short_term, 2);
        Ok(())
    }

    #[test]
    fn test_limits_apply() -> Result<()> {
        let mut db = LibraryDb::open_in_memory()?;
        db.import_snapshot(&snapshot())?;
        assert_eq!(db.fetch_recent_plays(2)?.len(), 2);
        assert_eq!(db.fetch_windowed_top(1, Timeframe::ShortTerm)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_clear() -> Result<()> {
        let mut db = LibraryDb::open_in_memory()?;
        db.import_snapshot(&snapshot())?;
        db.clear()?;
        assert_eq!(db.stats()?, LibraryStats::default());
        Ok(())
    }

    #[test]
    fn test_encoded_times_sort_across_offsets() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let earlier = at(1, 23); // 21:00 UTC
        let later = utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap();
        assert!(encode_time(&earlier) < encode_time(&later));
        assert_eq!(decode_time(&encode_time(&earlier)).unwrap(), earlier);
    }
}
