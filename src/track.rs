//! Track payloads and the raw record shapes the sources deliver.
//!
//! A [`Track`] is treated as inert data: only its `id` is read by the ranking
//! engine, everything else the platform sent is kept verbatim so it can be
//! handed back to the caller unchanged.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Stable key identifying a track across every source.
pub type TrackId = String;

/// A track as delivered by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Every other field of the platform object (artists, album, urls, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Track {
    #[must_use]
    pub fn new(id: impl Into<TrackId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn named(id: impl Into<TrackId>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(id)
        }
    }

    /// Artist names listed under `artists[].name`, in platform order.
    #[must_use]
    pub fn artist_names(&self) -> Vec<&str> {
        self.extra
            .get("artists")
            .and_then(Value::as_array)
            .map(|artists| {
                artists
                    .iter()
                    .filter_map(|artist| artist.get("name").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Human readable label: `Artist, Artist - Name`, falling back to the id.
    #[must_use]
    pub fn label(&self) -> String {
        let title = self.name.as_deref().unwrap_or(&self.id);
        match self.artist_names().as_slice() {
            [] => title.to_string(),
            artists => format!("{} - {title}", artists.join(", ")),
        }
    }
}

/// One record of the primary source.
///
/// Three shapes are recognized:
///
/// - `{track, played_at}` with a parsable timestamp is a history entry
/// - `{track}` with `played_at` missing or `null` is the "currently playing"
///   shape
/// - a bare track object is accepted as is
///
/// Anything else, including a `{track, played_at}` object whose timestamp is
/// present but unreadable, is kept as [`PrimaryRecord::Malformed`] so a single
/// bad entry never poisons the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PrimaryRecord {
    TimestampedPlay {
        track: Track,
        played_at: DateTime<FixedOffset>,
    },
    UntimestampedPlay {
        track: Track,
    },
    BareTrack(Track),
    Malformed(Value),
}

impl<'de> Deserialize<'de> for PrimaryRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self::classify(Value::deserialize(deserializer)?))
    }
}

impl PrimaryRecord {
    /// Sorts a raw JSON value into one of the record shapes. Never fails.
    #[must_use]
    pub fn classify(raw: Value) -> Self {
        Self::recognize(&raw).unwrap_or(Self::Malformed(raw))
    }

    fn recognize(raw: &Value) -> Option<Self> {
        let object = raw.as_object()?;
        let Some(track) = object.get("track").filter(|track| track.is_object()) else {
            return Track::deserialize(raw).ok().map(Self::BareTrack);
        };
        let track = Track::deserialize(track).ok()?;

        match object.get("played_at") {
            None | Some(Value::Null) => Some(Self::UntimestampedPlay { track }),
            Some(Value::String(played_at)) => played_at
                .parse::<DateTime<FixedOffset>>()
                .ok()
                .map(|played_at| Self::TimestampedPlay { track, played_at }),
            Some(_) => None,
        }
    }

    #[must_use]
    pub fn played(track: Track, played_at: DateTime<FixedOffset>) -> Self {
        Self::TimestampedPlay { track, played_at }
    }

    #[must_use]
    pub fn now_playing(track: Track) -> Self {
        Self::UntimestampedPlay { track }
    }

    /// The carried track, if the record has a recognizable shape.
    #[must_use]
    pub fn track(&self) -> Option<&Track> {
        match self {
            Self::TimestampedPlay { track, .. }
            | Self::UntimestampedPlay { track }
            | Self::BareTrack(track) => Some(track),
            Self::Malformed(_) => None,
        }
    }

    #[must_use]
    pub fn into_track(self) -> Option<Track> {
        match self {
            Self::TimestampedPlay { track, .. }
            | Self::UntimestampedPlay { track }
            | Self::BareTrack(track) => Some(track),
            Self::Malformed(_) => None,
        }
    }
}

impl From<Track> for PrimaryRecord {
    fn from(track: Track) -> Self {
        Self::BareTrack(track)
    }
}

/// An explicitly saved ("liked") track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRecord {
    pub track: Track,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<FixedOffset>>,
}

impl SavedRecord {
    #[must_use]
    pub fn new(track: Track) -> Self {
        Self {
            track,
            added_at: None,
        }
    }
}
