//! Ranking orchestration.
//!
//! [`TrackRanker`] fetches the three signal collections from a
//! [`TrackSource`], folds them into a [`TrackAccumulator`] in a fixed order
//! and returns the scored top list. It also owns the fallback policy:
//!
//! - an empty primary source under `short_term` returns the platform's own
//!   top list unchanged;
//! - an empty primary source under any other window is a
//!   [`RankError::PrimarySourceExhausted`] error;
//! - with [`Algorithm::Weighted`] and `fallback_to_platform` set, a failed
//!   weighted ranking is replaced by the platform top list.

use crate::accumulator::TrackAccumulator;
use crate::algorithm::{rank_scored, ScoredTrack, Timeframe, TrackCount, Weights};
use crate::error::RankError;
use crate::normalize::{
    normalize_primary_batch, normalize_saved, normalize_top_list, primary_tracks,
};
use crate::source::TrackSource;
use crate::track::{PrimaryRecord, Track};
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

/// How the top list is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// The platform's own list, unweighted
    Platform,
    /// Blend plays, saves and the platform list with the weighted model
    #[default]
    Weighted,
}

/// Everything a caller chooses for one ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RankRequest {
    pub count: TrackCount,
    pub timeframe: Timeframe,
    pub weights: Weights,
    pub algorithm: Algorithm,
    pub fallback_to_platform: bool,
}

impl Default for RankRequest {
    fn default() -> Self {
        Self {
            count: TrackCount::default(),
            timeframe: Timeframe::default(),
            weights: Weights::default(),
            algorithm: Algorithm::default(),
            fallback_to_platform: true,
        }
    }
}

/// Why a platform list was returned instead of a weighted one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformReason {
    /// [`Algorithm::Platform`] was asked for.
    Requested,
    /// The primary source was empty under `short_term`.
    EmptyShortTerm,
    /// The weighted ranking failed with this error.
    WeightedFailed(String),
}

/// Result of one ranking, with enough detail for `--explain`.
#[derive(Debug, Clone, PartialEq)]
pub enum RankReport {
    Weighted {
        ranked: Vec<ScoredTrack>,
        /// Distinct tracks accumulated before truncation.
        candidates: usize,
        /// Malformed primary records that were skipped.
        skipped: usize,
    },
    Platform {
        tracks: Vec<Track>,
        reason: PlatformReason,
    },
}

impl RankReport {
    /// The ranked payloads, in output order.
    #[must_use]
    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            Self::Weighted { ranked, .. } => ranked.into_iter().map(|entry| entry.track).collect(),
            Self::Platform { tracks, .. } => tracks,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Weighted { ranked, .. } => ranked.len(),
            Self::Platform { tracks, .. } => tracks.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drives the ranking pipeline over one source.
#[derive(Debug, Clone)]
pub struct TrackRanker<S> {
    source: S,
    weights: Weights,
}

impl<S: TrackSource> TrackRanker<S> {
    /// A ranker using the default weights.
    #[must_use]
    pub fn new(source: S) -> Self {
        Self {
            source,
            weights: Weights::default(),
        }
    }

    /// # Errors
    ///
    /// Rejects negative or non-finite weights.
    pub fn with_weights(mut self, weights: Weights) -> Result<Self> {
        weights.validate()?;
        self.weights = weights;
        Ok(self)
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Weighted ranking with the short-term fallback.
    ///
    /// # Errors
    ///
    /// Source errors are passed through with context. An empty primary
    /// source outside `short_term` is [`RankError::PrimarySourceExhausted`].
    pub fn rank_report(
        &self,
        count: TrackCount,
        timeframe: Timeframe,
        now: DateTime<FixedOffset>,
    ) -> Result<RankReport> {
        let limit = count.get();

        let primary = self
            .fetch_primary(limit, timeframe)
            .with_context(|| format!("Failed to fetch primary {timeframe} tracks"))?;
        debug!("Primary source returned {} {timeframe} records", primary.len());

        if primary.is_empty() {
            return match timeframe {
                Timeframe::ShortTerm => {
                    info!("No primary tracks for {timeframe}, using the platform top list");
                    let tracks = self
                        .source
                        .fetch_windowed_top(limit, timeframe)
                        .context("Failed to fetch platform top tracks for fallback")?;
                    Ok(RankReport::Platform {
                        tracks,
                        reason: PlatformReason::EmptyShortTerm,
                    })
                }
                _ => Err(RankError::PrimarySourceExhausted { timeframe }.into()),
            };
        }

        let top_list = match timeframe {
            Timeframe::Recent => Vec::new(),
            _ => self
                .source
                .fetch_windowed_top(limit, timeframe)
                .with_context(|| format!("Failed to fetch platform {timeframe} top tracks"))?,
        };
        debug!("Platform top list has {} tracks", top_list.len());

        let saved = self
            .source
            .fetch_saved(limit)
            .context("Failed to fetch saved tracks")?;
        debug!("Fetched {} saved tracks", saved.len());

        let primary = normalize_primary_batch(primary, now);
        let mut accumulator = TrackAccumulator::new();
        accumulator.fold_all(primary.observations, now);
        accumulator.fold_all(normalize_saved(saved, now), now);
        accumulator.fold_all(normalize_top_list(top_list, now), now);

        let candidates = accumulator.len();
        let ranked = rank_scored(accumulator.into_scored(&self.weights, timeframe), count);
        debug!(
            "Ranked {} of {candidates} candidates ({} malformed records skipped)",
            ranked.len(),
            primary.skipped
        );

        Ok(RankReport::Weighted {
            ranked,
            candidates,
            skipped: primary.skipped,
        })
    }

    /// Weighted ranking, payloads only.
    ///
    /// # Errors
    ///
    /// See [`TrackRanker::rank_report`].
    pub fn rank(
        &self,
        count: TrackCount,
        timeframe: Timeframe,
        now: DateTime<FixedOffset>,
    ) -> Result<Vec<Track>> {
        Ok(self.rank_report(count, timeframe, now)?.into_tracks())
    }

    /// The platform's own list: playback history for `recent`, the windowed
    /// top list otherwise.
    ///
    /// # Errors
    ///
    /// Source errors are passed through with context.
    pub fn platform_tracks(&self, count: TrackCount, timeframe: Timeframe) -> Result<Vec<Track>> {
        let limit = count.get();
        match timeframe {
            Timeframe::Recent => {
                let records = self
                    .source
                    .fetch_recent_plays(limit)
                    .context("Failed to fetch recently played tracks")?;
                let (tracks, skipped) = primary_tracks(records);
                if skipped > 0 {
                    warn!("Left {skipped} malformed records out of the recent history list");
                }
                Ok(tracks)
            }
            _ => self
                .source
                .fetch_windowed_top(limit, timeframe)
                .with_context(|| format!("Failed to fetch platform {timeframe} top tracks")),
        }
    }

    /// Run a full request, including the algorithm switch.
    ///
    /// This is the entry point the CLI uses. The request's weights replace
    /// the ranker's own for this call only.
    ///
    /// - [`Algorithm::Platform`] returns [`TrackRanker::platform_tracks`]
    ///   tagged [`PlatformReason::Requested`].
    /// - [`Algorithm::Weighted`] runs [`TrackRanker::rank_report`]. If that
    ///   fails and `fallback_to_platform` is set, the windowed top list is
    ///   returned instead, tagged [`PlatformReason::WeightedFailed`] with the
    ///   original error message.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The request carries negative or non-finite weights
    ///   ([`RankError::InvalidWeight`]); nothing is fetched then
    /// - The weighted ranking fails and the fallback is disabled
    /// - The timeframe is `recent`, which has no windowed list to fall back
    ///   to, and the weighted ranking fails
    /// - The fallback fetch itself fails; the message carries both errors
    /// - The platform algorithm's fetch fails
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{FixedOffset, TimeZone};
    /// use trackrank::ranking::{PlatformReason, RankReport, RankRequest, TrackRanker};
    /// use trackrank::source::{FetchKind, MemorySource, Snapshot, TopTracks};
    /// use trackrank::track::Track;
    ///
    /// let source = MemorySource::new(Snapshot {
    ///     top_tracks: TopTracks {
    ///         short_term: vec![Track::new("a")],
    ///         ..Default::default()
    ///     },
    ///     ..Default::default()
    /// })
    /// .failing(FetchKind::Saved);
    /// let now = FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    ///
    /// let report = TrackRanker::new(&source).load(&RankRequest::default(), now)?;
    /// assert!(matches!(
    ///     report,
    ///     RankReport::Platform { reason: PlatformReason::WeightedFailed(_), .. }
    /// ));
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn load(&self, request: &RankRequest, now: DateTime<FixedOffset>) -> Result<RankReport> {
        request.weights.validate()?;
        let ranker = TrackRanker {
            source: &self.source,
            weights: request.weights,
        };
        let can_fall_back = request.fallback_to_platform && request.timeframe != Timeframe::Recent;

        match request.algorithm {
            Algorithm::Platform => Ok(RankReport::Platform {
                tracks: ranker.platform_tracks(request.count, request.timeframe)?,
                reason: PlatformReason::Requested,
            }),
            Algorithm::Weighted => match ranker.rank_report(request.count, request.timeframe, now) {
                Ok(report) => Ok(report),
                Err(err) if can_fall_back => {
                    error!("Weighted ranking failed, falling back to the platform list: {err:#}");
                    let tracks = ranker
                        .source
                        .fetch_windowed_top(request.count.get(), request.timeframe)
                        .with_context(|| {
                            format!("Fallback after weighted ranking failure also failed: {err:#}")
                        })?;
                    Ok(RankReport::Platform {
                        tracks,
                        reason: PlatformReason::WeightedFailed(format!("{err:#}")),
                    })
                }
                Err(err) => Err(err),
            },
        }
    }

    fn fetch_primary(&self, limit: usize, timeframe: Timeframe) -> Result<Vec<PrimaryRecord>> {
        match timeframe {
            Timeframe::Recent => self.source.fetch_recent_plays(limit),
            _ => Ok(self
                .source
                .fetch_windowed_top(limit, timeframe)?
                .into_iter()
                .map(PrimaryRecord::from)
                .collect()),
        }
    }
}

/// Rank `source` under `timeframe`, returning at most `count` payloads.
///
/// `weights` defaults to [`Weights::default`]. `now` is the reference instant
/// for recency and time-of-day bands.
///
/// # Errors
///
/// See [`TrackRanker::rank_report`]; invalid weights are rejected as well.
///
/// # Examples
///
/// ```
/// use chrono::{FixedOffset, TimeZone};
/// use trackrank::algorithm::{Timeframe, TrackCount};
/// use trackrank::ranking::rank;
/// use trackrank::source::{MemorySource, Snapshot, TopTracks};
/// use trackrank::track::Track;
///
/// let source = MemorySource::new(Snapshot {
///     top_tracks: TopTracks {
///         medium_term: vec![Track::new("a"), Track::new("b")],
///         ..Default::default()
///     },
///     ..Default::default()
/// });
/// let now = FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
///
/// let ranked = rank(&source, TrackCount::default(), Timeframe::MediumTerm, None, now)?;
/// assert_eq!(ranked[0].id, "a");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn rank<S: TrackSource + ?Sized>(
    source: &S,
    count: TrackCount,
    timeframe: Timeframe,
    weights: Option<Weights>,
    now: DateTime<FixedOffset>,
) -> Result<Vec<Track>> {
    TrackRanker::new(source)
        .with_weights(weights.unwrap_or_default())?
        .rank(count, timeframe, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FetchKind, MemorySource, Snapshot, TopTracks};
    use crate::track::SavedRecord;
    use chrono::TimeZone;

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
            .unwrap()
    }

    fn tracks(ids: &[&str]) -> Vec<Track> {
        ids.iter().map(|id| Track::new(*id)).collect()
    }

    fn ids(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(|track| track.id.as_str()).collect()
    }

    #[test]
    fn test_recent_skips_windowed_top_fetch() {
        let source = MemorySource::new(Snapshot {
            recently_played: vec![PrimaryRecord::now_playing(Track::new("a"))],
            ..Default::default()
        });
        let ranker = TrackRanker::new(&source);
        ranker.rank(TrackCount::default(), Timeframe::Recent, now()).unwrap();
        assert_eq!(source.calls(), [FetchKind::RecentPlays, FetchKind::Saved]);
    }

    #[test]
    fn test_windowed_primary_fetches_top_twice() {
        let source = MemorySource::new(Snapshot {
            top_tracks: TopTracks {
                long_term: tracks(&["a"]),
                ..Default::default()
            },
            ..Default::default()
        });
        TrackRanker::new(&source)
            .rank(TrackCount::default(), Timeframe::LongTerm, now())
            .unwrap();
        assert_eq!(
            source.calls(),
            [
                FetchKind::WindowedTop(Timeframe::LongTerm),
                FetchKind::WindowedTop(Timeframe::LongTerm),
                FetchKind::Saved
            ]
        );
    }

    #[test]
    fn test_exhausted_primary_outside_short_term() {
        for timeframe in [Timeframe::MediumTerm, Timeframe::LongTerm, Timeframe::Recent] {
            let source = MemorySource::default();
            let err = TrackRanker::new(&source)
                .rank(TrackCount::default(), timeframe, now())
                .unwrap_err();
            assert_eq!(
                err.downcast_ref::<RankError>(),
                Some(&RankError::PrimarySourceExhausted { timeframe })
            );
            // Nothing else is fetched once the primary source came back empty.
            assert_eq!(source.calls().len(), 1);
        }
    }

    #[test]
    fn test_transport_errors_propagate() {
        let source = MemorySource::new(Snapshot {
            recently_played: vec![Track::new("a").into()],
            ..Default::default()
        })
        .failing(FetchKind::Saved);
        let err = TrackRanker::new(&source)
            .rank(TrackCount::default(), Timeframe::Recent, now())
            .unwrap_err();
        assert!(format!("{err:#}").contains("Simulated transport failure"));
        assert!(err.downcast_ref::<RankError>().is_none());
    }

    #[test]
    fn test_weighted_report_counts() {
        let source = MemorySource::new(Snapshot {
            recently_played: vec![
                Track::new("a").into(),
                PrimaryRecord::Malformed(serde_json::json!({"what": "ever"})),
                Track::new("b").into(),
            ],
            saved_tracks: vec![SavedRecord::new(Track::new("b"))],
            ..Default::default()
        });
        let report = TrackRanker::new(&source)
            .rank_report(TrackCount::default(), Timeframe::Recent, now())
            .unwrap();
        match report {
            RankReport::Weighted {
                ranked,
                candidates,
                skipped,
            } => {
                assert_eq!((candidates, skipped), (2, 1));
                assert_eq!(ranked[0].track.id, "b");
            }
            other => panic!("expected a weighted report, got {other:?}"),
        }
    }

    #[test]
    fn test_unreadable_play_timestamp_is_skipped() {
        let snapshot: Snapshot = serde_json::from_value(serde_json::json!({
            "recently_played": [
                {"track": {"id": "bad"}, "played_at": "not-a-date"},
                {"track": {"id": "good"}, "played_at": "2024-03-01T08:59:00Z"}
            ]
        }))
        .unwrap();
        let source = MemorySource::new(snapshot);

        let report = TrackRanker::new(&source)
            .rank_report(TrackCount::default(), Timeframe::Recent, now())
            .unwrap();
        match report {
            RankReport::Weighted {
                ranked,
                candidates,
                skipped,
            } => {
                assert_eq!((candidates, skipped), (1, 1));
                assert_eq!(ranked[0].track.id, "good");
                assert_eq!(ranked[0].factors.play_count, 1.0);
            }
            other => panic!("expected a weighted report, got {other:?}"),
        }
    }

    #[test]
    fn test_platform_algorithm_for_recent_uses_history() {
        let source = MemorySource::new(Snapshot {
            recently_played: vec![
                PrimaryRecord::played(Track::new("a"), now()),
                PrimaryRecord::Malformed(serde_json::json!(1)),
                Track::new("b").into(),
            ],
            ..Default::default()
        });
        let request = RankRequest {
            algorithm: Algorithm::Platform,
            timeframe: Timeframe::Recent,
            ..RankRequest::default()
        };
        let report = TrackRanker::new(&source).load(&request, now()).unwrap();
        assert!(matches!(
            report,
            RankReport::Platform {
                reason: PlatformReason::Requested,
                ..
            }
        ));
        assert_eq!(ids(&report.into_tracks()), ["a", "b"]);
    }

    #[test]
    fn test_weighted_failure_falls_back_to_platform() {
        let source = MemorySource::new(Snapshot {
            top_tracks: TopTracks {
                medium_term: tracks(&["x", "y"]),
                ..Default::default()
            },
            ..Default::default()
        })
        .failing(FetchKind::Saved);
        let request = RankRequest {
            timeframe: Timeframe::MediumTerm,
            ..RankRequest::default()
        };

        let report = TrackRanker::new(&source).load(&request, now()).unwrap();
        match &report {
            RankReport::Platform {
                reason: PlatformReason::WeightedFailed(message),
                ..
            } => assert!(message.contains("saved tracks")),
            other => panic!("expected a fallback, got {other:?}"),
        }
        assert_eq!(ids(&report.into_tracks()), ["x", "y"]);
    }

    #[test]
    fn test_fallback_disabled_or_recent_propagates() {
        let source = MemorySource::default();

        let no_fallback = RankRequest {
            timeframe: Timeframe::LongTerm,
            fallback_to_platform: false,
            ..RankRequest::default()
        };
        let err = TrackRanker::new(&source).load(&no_fallback, now()).unwrap_err();
        assert!(err.downcast_ref::<RankError>().is_some());

        let recent = RankRequest {
            timeframe: Timeframe::Recent,
            ..RankRequest::default()
        };
        let err = TrackRanker::new(&source).load(&recent, now()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RankError>(),
            Some(&RankError::PrimarySourceExhausted {
                timeframe: Timeframe::Recent
            })
        );
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let source = MemorySource::default();
        let weights = Weights {
            recency: -3.0,
            ..Weights::default()
        };
        assert!(TrackRanker::new(&source).with_weights(weights).is_err());
        let request = RankRequest {
            weights,
            ..RankRequest::default()
        };
        assert!(TrackRanker::new(&source).load(&request, now()).is_err());
        assert!(source.calls().is_empty());
    }
}
