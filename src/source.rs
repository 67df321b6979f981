//! Data sources feeding the ranking engine.
//!
//! The engine never talks to the streaming platform itself. It asks a
//! [`TrackSource`] for the three collections it needs; the implementations
//! here serve them from a JSON snapshot of the platform responses or from
//! memory. The SQLite library in [`crate::db`] is a third implementation.

use crate::algorithm::Timeframe;
use crate::track::{PrimaryRecord, SavedRecord, Track};
use anyhow::{bail, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

/// The three fetch operations the ranking engine depends on.
///
/// Each returns at most `limit` records, in the order the platform ranks
/// them. Errors are transport errors; the engine passes them through without
/// interpreting them.
pub trait TrackSource {
    /// Recent playback history, most recent first.
    fn fetch_recent_plays(&self, limit: usize) -> Result<Vec<PrimaryRecord>>;

    /// The platform's own top tracks for a window.
    fn fetch_windowed_top(&self, limit: usize, timeframe: Timeframe) -> Result<Vec<Track>>;

    /// Saved ("liked") tracks, most recently saved first.
    fn fetch_saved(&self, limit: usize) -> Result<Vec<SavedRecord>>;
}

impl<S: TrackSource + ?Sized> TrackSource for &S {
    fn fetch_recent_plays(&self, limit: usize) -> Result<Vec<PrimaryRecord>> {
        (**self).fetch_recent_plays(limit)
    }

    fn fetch_windowed_top(&self, limit: usize, timeframe: Timeframe) -> Result<Vec<Track>> {
        (**self).fetch_windowed_top(limit, timeframe)
    }

    fn fetch_saved(&self, limit: usize) -> Result<Vec<SavedRecord>> {
        (**self).fetch_saved(limit)
    }
}

impl<S: TrackSource + ?Sized> TrackSource for Box<S> {
    fn fetch_recent_plays(&self, limit: usize) -> Result<Vec<PrimaryRecord>> {
        (**self).fetch_recent_plays(limit)
    }

    fn fetch_windowed_top(&self, limit: usize, timeframe: Timeframe) -> Result<Vec<Track>> {
        (**self).fetch_windowed_top(limit, timeframe)
    }

    fn fetch_saved(&self, limit: usize) -> Result<Vec<SavedRecord>> {
        (**self).fetch_saved(limit)
    }
}

/// Windowed top lists, one per platform window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopTracks {
    pub short_term: Vec<Track>,
    pub medium_term: Vec<Track>,
    pub long_term: Vec<Track>,
}

impl TopTracks {
    /// `None` for [`Timeframe::Recent`], which has no windowed list.
    #[must_use]
    pub fn window(&self, timeframe: Timeframe) -> Option<&[Track]> {
        match timeframe {
            Timeframe::ShortTerm => Some(self.short_term.as_slice()),
            Timeframe::MediumTerm => Some(self.medium_term.as_slice()),
            Timeframe::LongTerm => Some(self.long_term.as_slice()),
            Timeframe::Recent => None,
        }
    }
}

/// Exported platform responses.
///
/// ```json
/// {
///   "recently_played": [{"track": {"id": "..."}, "played_at": "2024-03-01T10:00:00Z"}],
///   "top_tracks": {"short_term": [{"id": "..."}], "medium_term": [], "long_term": []},
///   "saved_tracks": [{"track": {"id": "..."}}]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub recently_played: Vec<PrimaryRecord>,
    pub top_tracks: TopTracks,
    pub saved_tracks: Vec<SavedRecord>,
}

impl Snapshot {
    /// Read and decode a snapshot file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or is not a valid snapshot.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let snapshot: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid snapshot JSON in {}", path.display()))?;
        debug!(
            "Loaded snapshot {}: {} plays, {} saved",
            path.display(),
            snapshot.recently_played.len(),
            snapshot.saved_tracks.len()
        );
        Ok(snapshot)
    }

    fn recent(&self, limit: usize) -> Vec<PrimaryRecord> {
        self.recently_played.iter().take(limit).cloned().collect()
    }

    fn windowed(&self, limit: usize, timeframe: Timeframe) -> Result<Vec<Track>> {
        match self.top_tracks.window(timeframe) {
            Some(tracks) => Ok(tracks.iter().take(limit).cloned().collect()),
            None => bail!("The platform has no windowed top list for `{timeframe}'"),
        }
    }

    fn saved(&self, limit: usize) -> Vec<SavedRecord> {
        self.saved_tracks.iter().take(limit).cloned().collect()
    }
}

/// Serves a snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    path: PathBuf,
    snapshot: Snapshot,
}

impl SnapshotSource {
    /// # Errors
    ///
    /// See [`Snapshot::load`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = Snapshot::load(&path)?;
        Ok(Self { path, snapshot })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl TrackSource for SnapshotSource {
    fn fetch_recent_plays(&self, limit: usize) -> Result<Vec<PrimaryRecord>> {
        Ok(self.snapshot.recent(limit))
    }

    fn fetch_windowed_top(&self, limit: usize, timeframe: Timeframe) -> Result<Vec<Track>> {
        self.snapshot.windowed(limit, timeframe)
    }

    fn fetch_saved(&self, limit: usize) -> Result<Vec<SavedRecord>> {
        Ok(self.snapshot.saved(limit))
    }
}

/// Which of the three operations a call was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    RecentPlays,
    WindowedTop(Timeframe),
    Saved,
}

/// In-memory source that records every call and can be told to fail.
#[derive(Debug, Default)]
pub struct MemorySource {
    pub snapshot: Snapshot,
    failing: Vec<FetchKind>,
    calls: RefCell<Vec<FetchKind>>,
}

impl MemorySource {
    #[must_use]
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            ..Self::default()
        }
    }

    /// Make `kind` fail with a transport error.
    #[must_use]
    pub fn failing(mut self, kind: FetchKind) -> Self {
        self.failing.push(kind);
        self
    }

    /// Calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<FetchKind> {
        self.calls.borrow().clone()
    }

    fn record(&self, kind: FetchKind) -> Result<()> {
        self.calls.borrow_mut().push(kind);
        if self.failing.contains(&kind) {
            bail!("Simulated transport failure for {kind:?}");
        }
        Ok(())
    }
}

impl TrackSource for MemorySource {
    fn fetch_recent_plays(&self, limit: usize) -> Result<Vec<PrimaryRecord>> {
        self.record(FetchKind::RecentPlays)?;
        Ok(self.snapshot.recent(limit))
    }

    fn fetch_windowed_top(&self, limit: usize, timeframe: Timeframe) -> Result<Vec<Track>> {
        self.record(FetchKind::WindowedTop(timeframe))?;
        self.snapshot.windowed(limit, timeframe)
    }

    fn fetch_saved(&self, limit: usize) -> Result<Vec<SavedRecord>> {
        self.record(FetchKind::Saved)?;
        Ok(self.snapshot.saved(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tracks(ids: &[&str]) -> Vec<Track> {
        ids.iter().map(|id| Track::new(*id)).collect()
    }

    #[test]
    fn test_snapshot_limits_and_order() {
        let snapshot = Snapshot {
            recently_played: tracks(&["a", "b", "c"]).into_iter().map(Into::into).collect(),
            top_tracks: TopTracks {
                long_term: tracks(&["x", "y", "z"]),
                ..Default::default()
            },
            saved_tracks: tracks(&["s1", "s2"]).into_iter().map(SavedRecord::new).collect(),
        };
        let source = MemorySource::new(snapshot);

        assert_eq!(source.fetch_recent_plays(2).unwrap().len(), 2);
        let top = source.fetch_windowed_top(2, Timeframe::LongTerm).unwrap();
        assert_eq!(top, tracks(&["x", "y"]));
        assert!(source.fetch_windowed_top(10, Timeframe::MediumTerm).unwrap().is_empty());
        assert_eq!(source.fetch_saved(50).unwrap().len(), 2);
    }

    #[test]
    fn test_recent_has_no_windowed_list() {
        let source = MemorySource::default();
        assert!(source.fetch_windowed_top(10, Timeframe::Recent).is_err());
    }

    #[test]
    fn test_memory_source_records_and_fails() {
        let source = MemorySource::default().failing(FetchKind::Saved);
        assert!(source.fetch_recent_plays(10).is_ok());
        assert!(source.fetch_saved(10).is_err());
        assert_eq!(source.calls(), [FetchKind::RecentPlays, FetchKind::Saved]);
    }

    #[test]
    fn test_snapshot_file_with_mixed_records() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{
                "recently_played": [
                    {{"track": {{"id": "a"}}, "played_at": "2024-03-01T08:00:00Z"}},
                    {{"track": {{"id": "b"}}}},
                    {{"id": "c"}},
                    {{"bogus": 1}}
                ],
                "top_tracks": {{"short_term": [{{"id": "a"}}]}},
                "saved_tracks": [
                    {{"track": {{"id": "a"}}, "added_at": "2023-12-24T18:00:00+01:00"}}
                ]
            }}"#
        )?;

        let source = SnapshotSource::open(file.path())?;
        let recent = source.fetch_recent_plays(50)?;
        assert!(matches!(recent[0], PrimaryRecord::TimestampedPlay { .. }));
        assert!(matches!(recent[1], PrimaryRecord::UntimestampedPlay { .. }));
        assert!(matches!(recent[2], PrimaryRecord::BareTrack(_)));
        assert!(matches!(recent[3], PrimaryRecord::Malformed(_)));
        assert_eq!(source.fetch_windowed_top(10, Timeframe::ShortTerm)?.len(), 1);
        assert!(source.fetch_saved(10)?[0].added_at.is_some());
        Ok(())
    }

    #[test]
    fn test_snapshot_errors_carry_path() {
        let err = SnapshotSource::open("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
