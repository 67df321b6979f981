//! Per-track factor accumulation.
//!
//! Observations from every source are folded into one entry per track
//! identity. Entries keep the order they were first inserted in, which is the
//! tie-break order of the final ranking.

use crate::algorithm::{calculate_score, ScoredTrack, Timeframe, Weights};
use crate::normalize::{Observation, SourceKind};
use crate::track::{Track, TrackId};
use chrono::{DateTime, FixedOffset, Timelike};
use log::trace;
use serde::Serialize;
use std::collections::HashMap;

/// Independent scoring signals collected for one track.
///
/// `skip_rate`, `audio_features` and `playlist_presence` are part of the
/// schema but no source feeds them yet; they stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FactorVector {
    pub play_count: f64,
    pub recency: f64,
    pub user_rating: f64,
    pub skip_rate: f64,
    pub time_of_day: f64,
    pub audio_features: f64,
    pub playlist_presence: f64,
}

/// What folding one observation did to the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// A new entry was created.
    Seeded,
    /// An existing entry was updated.
    Boosted,
    /// The observation was ignored (saved track never seen elsewhere).
    Dropped,
}

#[derive(Debug, Clone)]
struct Entry {
    track: Track,
    factors: FactorVector,
}

/// Insertion-ordered map from track identity to accumulated factors.
#[derive(Debug, Default)]
pub struct TrackAccumulator {
    entries: Vec<Entry>,
    index: HashMap<TrackId, usize>,
}

impl TrackAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn factors(&self, id: &str) -> Option<&FactorVector> {
        self.index.get(id).map(|&slot| &self.entries[slot].factors)
    }

    /// Identities in first-seen order.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|entry| entry.track.id.as_str())
    }

    /// Apply the accumulation rule of the observation's source.
    ///
    /// `now` is the reference instant for recency and the local offset used
    /// to read the hour of day.
    pub fn fold(&mut self, observation: Observation, now: DateTime<FixedOffset>) -> FoldOutcome {
        let Observation {
            identity,
            payload,
            observed_at,
            kind,
        } = observation;

        match kind {
            SourceKind::Play | SourceKind::CurrentPlay => {
                let (outcome, factors) = self.entry_or_seed(identity, payload);
                factors.play_count += match kind {
                    SourceKind::CurrentPlay => 2.0,
                    _ => 1.0,
                };
                factors.recency += recency_contribution(observed_at, now);
                factors.time_of_day += time_of_day_contribution(observed_at, now);
                outcome
            }
            SourceKind::Saved => match self.index.get(&identity) {
                Some(&slot) => {
                    self.entries[slot].factors.user_rating += 2.0;
                    FoldOutcome::Boosted
                }
                None => {
                    trace!("Dropping saved track `{identity}' not seen in any other source");
                    FoldOutcome::Dropped
                }
            },
            SourceKind::TopList { rank } => {
                let (outcome, factors) = self.entry_or_seed(identity, payload);
                factors.play_count += top_rank_bonus(rank);
                outcome
            }
        }
    }

    /// Fold a whole batch, in order.
    pub fn fold_all(
        &mut self,
        observations: impl IntoIterator<Item = Observation>,
        now: DateTime<FixedOffset>,
    ) {
        for observation in observations {
            self.fold(observation, now);
        }
    }

    /// Score every entry, consuming the accumulator. Output keeps insertion
    /// order.
    #[must_use]
    pub fn into_scored(self, weights: &Weights, timeframe: Timeframe) -> Vec<ScoredTrack> {
        self.entries
            .into_iter()
            .map(|Entry { track, factors }| {
                let score = calculate_score(&factors, weights, timeframe);
                trace!("Scored `{}' at {score:.3}", track.id);
                ScoredTrack {
                    track,
                    score,
                    factors,
                }
            })
            .collect()
    }

    fn entry_or_seed(
        &mut self,
        identity: TrackId,
        track: Track,
    ) -> (FoldOutcome, &mut FactorVector) {
        match self.index.get(&identity).copied() {
            Some(slot) => (FoldOutcome::Boosted, &mut self.entries[slot].factors),
            None => {
                let slot = self.entries.len();
                self.index.insert(identity, slot);
                self.entries.push(Entry {
                    track,
                    factors: FactorVector::default(),
                });
                (FoldOutcome::Seeded, &mut self.entries[slot].factors)
            }
        }
    }
}

/// 1.0 for a play happening now, decaying linearly to 0.0 at 24 hours.
///
/// Timestamps after `now` are capped at 1.0.
#[must_use]
pub fn recency_contribution(observed_at: DateTime<FixedOffset>, now: DateTime<FixedOffset>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let hours_elapsed = (now - observed_at).num_milliseconds() as f64 / 3_600_000.0;
    ((24.0 - hours_elapsed).max(0.0) / 24.0).min(1.0)
}

/// Circadian band of the play, read in `now`'s local offset.
#[must_use]
pub fn time_of_day_contribution(
    observed_at: DateTime<FixedOffset>,
    now: DateTime<FixedOffset>,
) -> f64 {
    match observed_at.with_timezone(now.offset()).hour() {
        6..=12 => 1.2,
        18..=23 => 1.1,
        _ => 0.8,
    }
}

/// Small bonus for the platform's own ranking; rank 0 gets 0.1, ranks 9 and
/// beyond get 0.01.
#[must_use]
pub fn top_rank_bonus(rank: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let numerator = 10usize.saturating_sub(rank).max(1) as f64;
    numerator / 10.0 * 0.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 1, hour, 0, 0)
            .unwrap()
    }

    fn observation(id: &str, observed_at: DateTime<FixedOffset>, kind: SourceKind) -> Observation {
        Observation {
            identity: id.to_string(),
            payload: Track::new(id),
            observed_at,
            kind,
        }
    }

    #[test]
    fn test_recency_decay() {
        let now = at(20);
        assert_eq!(recency_contribution(now, now), 1.0);
        assert_eq!(recency_contribution(now - Duration::hours(12), now), 0.5);
        assert_eq!(recency_contribution(now - Duration::hours(24), now), 0.0);
        assert_eq!(recency_contribution(now - Duration::hours(72), now), 0.0);
        assert_eq!(recency_contribution(now + Duration::hours(3), now), 1.0);
    }

    #[test]
    fn test_time_of_day_bands() {
        let now = at(0);
        for (hour, expected) in [
            (0, 0.8),
            (5, 0.8),
            (6, 1.2),
            (12, 1.2),
            (13, 0.8),
            (17, 0.8),
            (18, 1.1),
            (23, 1.1),
        ] {
            assert_eq!(time_of_day_contribution(at(hour), now), expected, "hour {hour}");
        }
    }

    #[test]
    fn test_time_of_day_uses_local_offset_of_now() {
        // 04:00 UTC is 09:00 at UTC+5.
        let now = FixedOffset::east_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .unwrap();
        assert_eq!(time_of_day_contribution(at(4), now), 1.2);
    }

    #[test]
    fn test_top_rank_bonus() {
        assert_eq!(top_rank_bonus(0), 10.0 / 10.0 * 0.1);
        assert_eq!(top_rank_bonus(9), 1.0 / 10.0 * 0.1);
        assert_eq!(top_rank_bonus(9), top_rank_bonus(10));
        assert_eq!(top_rank_bonus(9), top_rank_bonus(49));
        assert!(top_rank_bonus(3) > top_rank_bonus(4));
    }

    #[test]
    fn test_play_rules() {
        let now = at(10);
        let mut acc = TrackAccumulator::new();

        assert_eq!(acc.fold(observation("a", now, SourceKind::Play), now), FoldOutcome::Seeded);
        assert_eq!(
            acc.fold(observation("a", now, SourceKind::CurrentPlay), now),
            FoldOutcome::Boosted
        );

        let factors = acc.factors("a").unwrap();
        assert_eq!(factors.play_count, 3.0);
        assert_eq!(factors.recency, 2.0);
        assert_eq!(factors.time_of_day, 2.4);
        assert_eq!(factors.user_rating, 0.0);
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn test_saved_only_boosts_existing_entries() {
        let now = at(10);
        let mut acc = TrackAccumulator::new();
        acc.fold(observation("a", now, SourceKind::Play), now);

        assert_eq!(acc.fold(observation("a", now, SourceKind::Saved), now), FoldOutcome::Boosted);
        assert_eq!(acc.fold(observation("z", now, SourceKind::Saved), now), FoldOutcome::Dropped);

        assert_eq!(acc.factors("a").unwrap().user_rating, 2.0);
        assert!(acc.factors("z").is_none());
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn test_top_list_seeds_and_boosts() {
        let now = at(10);
        let mut acc = TrackAccumulator::new();
        acc.fold(observation("a", now, SourceKind::Play), now);

        acc.fold(observation("a", now, SourceKind::TopList { rank: 0 }), now);
        acc.fold(observation("b", now, SourceKind::TopList { rank: 1 }), now);

        assert_eq!(
            *acc.factors("a").unwrap(),
            FactorVector {
                play_count: 1.0 + top_rank_bonus(0),
                recency: 1.0,
                time_of_day: 1.2,
                ..Default::default()
            }
        );
        let seeded = acc.factors("b").unwrap();
        assert_eq!(
            *seeded,
            FactorVector {
                play_count: top_rank_bonus(1),
                ..Default::default()
            }
        );
        assert_eq!(acc.ids().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn test_reserved_factors_stay_zero() {
        let now = at(10);
        let mut acc = TrackAccumulator::new();
        acc.fold_all(
            [
                observation("a", now, SourceKind::Play),
                observation("a", now, SourceKind::Saved),
                observation("a", now, SourceKind::TopList { rank: 2 }),
            ],
            now,
        );
        let factors = acc.factors("a").unwrap();
        assert_eq!(factors.skip_rate, 0.0);
        assert_eq!(factors.audio_features, 0.0);
        assert_eq!(factors.playlist_presence, 0.0);
    }

    #[test]
    fn test_first_payload_is_kept() {
        let now = at(10);
        let mut acc = TrackAccumulator::new();
        acc.fold(
            Observation {
                payload: Track::named("a", "first"),
                ..observation("a", now, SourceKind::Play)
            },
            now,
        );
        acc.fold(
            Observation {
                payload: Track::named("a", "second"),
                ..observation("a", now, SourceKind::TopList { rank: 0 })
            },
            now,
        );
        let scored = acc.into_scored(&Weights::default(), Timeframe::MediumTerm);
        assert_eq!(scored[0].track.name.as_deref(), Some("first"));
    }

    #[test]
    fn test_into_scored_keeps_insertion_order() {
        let now = at(10);
        let mut acc = TrackAccumulator::new();
        for id in ["c", "a", "b"] {
            acc.fold(observation(id, now, SourceKind::TopList { rank: 0 }), now);
        }
        let scored = acc.into_scored(&Weights::default(), Timeframe::LongTerm);
        let ids: Vec<_> = scored.iter().map(|entry| entry.track.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
        assert!(scored.iter().all(|entry| entry.score == scored[0].score));
    }
}
