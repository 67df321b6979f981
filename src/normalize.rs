//! Record normalization.
//!
//! Each source delivers its own record shape. They are all flattened here into
//! one [`Observation`] type so the accumulator only has to know which rule to
//! apply, never how the record looked.

use crate::track::{PrimaryRecord, SavedRecord, Track, TrackId};
use chrono::{DateTime, FixedOffset};
use log::warn;
use serde_json::Value;

/// Which accumulation rule an observation falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// History entry or bare track from the primary source.
    Play,
    /// Primary record in the "currently playing" shape, without a timestamp.
    CurrentPlay,
    Saved,
    /// Entry of the platform's windowed top list at a zero-based rank.
    TopList { rank: usize },
}

/// A source record reduced to what the accumulator needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub identity: TrackId,
    pub payload: Track,
    pub observed_at: DateTime<FixedOffset>,
    pub kind: SourceKind,
}

impl Observation {
    fn new(track: Track, observed_at: DateTime<FixedOffset>, kind: SourceKind) -> Self {
        Self {
            identity: track.id.clone(),
            payload: track,
            observed_at,
            kind,
        }
    }
}

/// Observations of one primary batch plus the number of records skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimaryBatch {
    pub observations: Vec<Observation>,
    pub skipped: usize,
}

/// Normalize one primary record. Malformed records yield `None`.
#[must_use]
pub fn normalize_primary(
    record: PrimaryRecord,
    now: DateTime<FixedOffset>,
) -> Option<Observation> {
    match record {
        PrimaryRecord::TimestampedPlay { track, played_at } => {
            Some(Observation::new(track, played_at, SourceKind::Play))
        }
        PrimaryRecord::UntimestampedPlay { track } => {
            Some(Observation::new(track, now, SourceKind::CurrentPlay))
        }
        PrimaryRecord::BareTrack(track) => Some(Observation::new(track, now, SourceKind::Play)),
        PrimaryRecord::Malformed(_) => None,
    }
}

/// Normalize a primary batch, skipping and reporting malformed records.
#[must_use]
pub fn normalize_primary_batch(
    records: Vec<PrimaryRecord>,
    now: DateTime<FixedOffset>,
) -> PrimaryBatch {
    let mut batch = PrimaryBatch {
        observations: Vec::with_capacity(records.len()),
        skipped: 0,
    };

    for (position, record) in records.into_iter().enumerate() {
        if let PrimaryRecord::Malformed(raw) = &record {
            warn_skipped(position, raw);
            batch.skipped += 1;
            continue;
        }
        batch.observations.extend(normalize_primary(record, now));
    }

    batch
}

/// Payloads of a primary batch in source order, for the platform's own list.
/// Malformed records are skipped and reported like in
/// [`normalize_primary_batch`]; their number is returned alongside.
#[must_use]
pub fn primary_tracks(records: Vec<PrimaryRecord>) -> (Vec<Track>, usize) {
    let mut skipped = 0;
    let tracks = records
        .into_iter()
        .enumerate()
        .filter_map(|(position, record)| match record {
            PrimaryRecord::Malformed(raw) => {
                warn_skipped(position, &raw);
                skipped += 1;
                None
            }
            record => record.into_track(),
        })
        .collect();
    (tracks, skipped)
}

fn warn_skipped(position: usize, raw: &Value) {
    warn!("Skipping primary record #{position} with unknown structure: {raw}");
}

/// Saved records carry no play; `observed_at` is the save date when known.
#[must_use]
pub fn normalize_saved(
    records: Vec<SavedRecord>,
    now: DateTime<FixedOffset>,
) -> Vec<Observation> {
    records
        .into_iter()
        .map(|SavedRecord { track, added_at }| {
            Observation::new(track, added_at.unwrap_or(now), SourceKind::Saved)
        })
        .collect()
}

/// Top-list entries keep their position as the rank.
#[must_use]
pub fn normalize_top_list(tracks: Vec<Track>, now: DateTime<FixedOffset>) -> Vec<Observation> {
    tracks
        .into_iter()
        .enumerate()
        .map(|(rank, track)| Observation::new(track, now, SourceKind::TopList { rank }))
        .collect()
}
