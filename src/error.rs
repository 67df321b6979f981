//! Typed ranking conditions.
//!
//! Everything fallible in trackrank returns `anyhow::Result`. The conditions
//! below are the ones a caller may want to react to (retry with another
//! timeframe, reject a flag), so they are raised as [`RankError`] and can be
//! recovered with `err.downcast_ref::<RankError>()`.

use crate::algorithm::Timeframe;
use thiserror::Error;

/// Conditions raised by the ranking engine and its inputs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RankError {
    /// The primary source returned nothing for a window that has no fallback.
    #[error("no {timeframe} tracks available from the primary source")]
    PrimarySourceExhausted { timeframe: Timeframe },

    #[error("unsupported track count {0} (expected 10, 20, 30 or 50)")]
    InvalidTrackCount(usize),

    #[error("weight `{name}` must be non-negative and finite for every timeframe, got {value}")]
    InvalidWeight { name: &'static str, value: f64 },

    #[error("unknown timeframe `{0}` (expected short_term, medium_term, long_term or recent)")]
    UnknownTimeframe(String),
}
