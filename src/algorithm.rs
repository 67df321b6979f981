//! Track scoring and ranking.
//!
//! Turns an accumulated [`FactorVector`] into a single score under a
//! [`Weights`] configuration and a [`Timeframe`], then orders and truncates the
//! scored tracks.

use crate::accumulator::FactorVector;
use crate::error::RankError;
use crate::track::Track;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ranking window.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    /// Roughly the last four weeks
    #[default]
    #[value(name = "short_term")]
    ShortTerm,
    /// Roughly the last six months
    #[value(name = "medium_term")]
    MediumTerm,
    /// Several years of history
    #[value(name = "long_term")]
    LongTerm,
    /// Playback history only
    #[value(name = "recent")]
    Recent,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [
        Timeframe::ShortTerm,
        Timeframe::MediumTerm,
        Timeframe::LongTerm,
        Timeframe::Recent,
    ];

    /// Fixed amplification of the play and recency terms for this window.
    #[must_use]
    pub const fn factor(self) -> f64 {
        match self {
            Self::ShortTerm => 1.5,
            Self::MediumTerm => 1.0,
            Self::LongTerm => 0.5,
            Self::Recent => 2.0,
        }
    }

    /// Name used by the platform API and in snapshots.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::MediumTerm => "medium_term",
            Self::LongTerm => "long_term",
            Self::Recent => "recent",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = RankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|timeframe| timeframe.as_str() == s)
            .ok_or_else(|| RankError::UnknownTimeframe(s.to_string()))
    }
}

/// Number of tracks a ranking is truncated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct TrackCount(usize);

impl TrackCount {
    pub const ALLOWED: [usize; 4] = [10, 20, 30, 50];

    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl Default for TrackCount {
    fn default() -> Self {
        Self(10)
    }
}

impl TryFrom<usize> for TrackCount {
    type Error = RankError;

    fn try_from(count: usize) -> Result<Self, Self::Error> {
        match Self::ALLOWED.contains(&count) {
            true => Ok(Self(count)),
            false => Err(RankError::InvalidTrackCount(count)),
        }
    }
}

impl From<TrackCount> for usize {
    fn from(count: TrackCount) -> Self {
        count.0
    }
}

impl FromStr for TrackCount {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let count: usize = s.trim().parse()?;
        Ok(Self::try_from(count)?)
    }
}

impl fmt::Display for TrackCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Multipliers applied to each accumulated factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub play_count: f64,
    pub recency: f64,
    pub user_rating: f64,
    pub time_of_day: f64,
    /// Scales the fixed per-timeframe factor.
    pub timeframe_multiplier: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            play_count: 10.0,
            recency: 3.0,
            user_rating: 8.0,
            time_of_day: 1.0,
            timeframe_multiplier: 1.0,
        }
    }
}

impl Weights {
    /// Build a validated weight set.
    ///
    /// # Errors
    ///
    /// Returns [`RankError::InvalidWeight`] for negative or non-finite values.
    pub fn new(
        play_count: f64,
        recency: f64,
        user_rating: f64,
        time_of_day: f64,
        timeframe_multiplier: f64,
    ) -> Result<Self, RankError> {
        let weights = Self {
            play_count,
            recency,
            user_rating,
            time_of_day,
            timeframe_multiplier,
        };
        weights.validate()?;
        Ok(weights)
    }

    /// Check every multiplier is finite and non-negative, and stays finite
    /// once scaled by the largest timeframe factor.
    ///
    /// # Errors
    ///
    /// Returns the first offending weight as [`RankError::InvalidWeight`].
    pub fn validate(&self) -> Result<(), RankError> {
        let named = [
            ("play_count", self.play_count),
            ("recency", self.recency),
            ("user_rating", self.user_rating),
            ("time_of_day", self.time_of_day),
            ("timeframe_multiplier", self.timeframe_multiplier),
        ];
        if let Some((name, value)) = named
            .into_iter()
            .find(|(_, value)| !value.is_finite() || *value < 0.0)
        {
            return Err(RankError::InvalidWeight { name, value });
        }

        // `recent` has the largest factor, so every other window stays finite too.
        let multiplier = self.effective_multiplier(Timeframe::Recent);
        let scaled = [
            ("timeframe_multiplier", multiplier, self.timeframe_multiplier),
            ("play_count", self.play_count * multiplier, self.play_count),
            ("recency", self.recency * multiplier, self.recency),
        ];
        match scaled.into_iter().find(|(_, product, _)| !product.is_finite()) {
            Some((name, _, value)) => Err(RankError::InvalidWeight { name, value }),
            None => Ok(()),
        }
    }

    /// Multiplier applied to the play count and recency terms.
    #[must_use]
    pub fn effective_multiplier(&self, timeframe: Timeframe) -> f64 {
        self.timeframe_multiplier * timeframe.factor()
    }
}

/// A track with its final score and the factors that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTrack {
    pub track: Track,
    pub score: f64,
    pub factors: FactorVector,
}

/// Weighted score of one factor vector.
///
/// ```text
/// m     = weights.timeframe_multiplier * timeframe.factor()
/// score = play_count * w.play_count * m
///       + recency    * w.recency    * m
///       + user_rating * w.user_rating
///       + time_of_day * w.time_of_day
/// ```
///
/// Only the play count and recency terms are scaled by the timeframe.
///
/// # Examples
///
/// ```
/// use trackrank::accumulator::FactorVector;
/// use trackrank::algorithm::{calculate_score, Timeframe, Weights};
///
/// let factors = FactorVector {
///     play_count: 2.0,
///     recency: 1.0,
///     user_rating: 2.0,
///     ..Default::default()
/// };
/// let score = calculate_score(&factors, &Weights::default(), Timeframe::Recent);
/// assert_eq!(score, 62.0);
/// ```
#[must_use]
pub fn calculate_score(factors: &FactorVector, weights: &Weights, timeframe: Timeframe) -> f64 {
    let multiplier = weights.effective_multiplier(timeframe);

    factors.play_count * (weights.play_count * multiplier)
        + factors.recency * (weights.recency * multiplier)
        + factors.user_rating * weights.user_rating
        + factors.time_of_day * weights.time_of_day
}

/// Order by score, highest first, and keep the first `count` tracks.
///
/// The sort is stable, so equal scores keep the order the tracks were first
/// seen in. Scores compare with [`f64::total_cmp`].
#[must_use]
pub fn rank_scored(mut scored: Vec<ScoredTrack>, count: TrackCount) -> Vec<ScoredTrack> {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(count.get());
    scored
}

/// Summary figures for `--explain` output.
pub mod statistics {
    use super::ScoredTrack;

    #[derive(Debug, Clone, PartialEq)]
    pub struct ScoreStatistics {
        pub mean: f64,
        pub std_deviation: f64,
        pub min: f64,
        pub max: f64,
        pub count: usize,
    }

    /// `None` for an empty ranking.
    #[must_use]
    pub fn analyze_score_distribution(ranked: &[ScoredTrack]) -> Option<ScoreStatistics> {
        if ranked.is_empty() {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let len = ranked.len() as f64;
        let mean = ranked.iter().map(|entry| entry.score).sum::<f64>() / len;
        let variance = ranked
            .iter()
            .map(|entry| (entry.score - mean).powi(2))
            .sum::<f64>()
            / len;

        Some(ScoreStatistics {
            mean,
            std_deviation: variance.sqrt(),
            min: ranked.iter().fold(f64::INFINITY, |a, b| a.min(b.score)),
            max: ranked.iter().fold(f64::NEG_INFINITY, |a, b| a.max(b.score)),
            count: ranked.len(),
        })
    }
}
