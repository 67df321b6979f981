//! Weighted track ranking over a listener's streaming history.
//!
//! trackrank merges three signals about a listener (playback history or the
//! platform's windowed top list, saved tracks, and the platform's top list
//! itself) into one scored, deterministic top list.
//!
//! Core modules:
//! - [`ranking`] - Fetch, fold, score and the fallback policies
//! - [`accumulator`] - Per-track factor accumulation
//! - [`algorithm`] - Weights, timeframes and the scoring function
//! - [`source`] - The `TrackSource` seam and snapshot-backed sources
//! - [`db`] - Local SQLite library of imported snapshots
//!
//! ### Supporting Modules
//!
//! - [`track`] - Track payloads and the primary record shapes
//! - [`normalize`] - Turning raw records into observations
//! - [`error`] - Typed ranking errors
//! - [`config`] - Configuration file and data directory management
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use trackrank::algorithm::{Timeframe, TrackCount};
//! use trackrank::ranking::TrackRanker;
//! use trackrank::source::SnapshotSource;
//!
//! let source = SnapshotSource::open("export.json")?;
//! let now = chrono::Local::now().fixed_offset();
//!
//! let top = TrackRanker::new(source).rank(TrackCount::default(), Timeframe::Recent, now)?;
//! for (position, track) in top.iter().enumerate() {
//!     println!("{:>2}. {}", position + 1, track.label());
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Scoring
//!
//! Every distinct track gets a factor vector. Primary records raise
//! `play_count`, `recency` and `time_of_day`; a saved track raises
//! `user_rating` only when the track is already a candidate; the platform's
//! top list adds a small rank bonus to `play_count` and can seed candidates
//! of its own. The score is the weighted sum, with the play count and recency
//! terms scaled by the timeframe factor.
//!
//! ## Error Handling
//!
//! Public functions return `anyhow::Result`. Domain failures are
//! [`error::RankError`] values and can be recovered with
//! `anyhow::Error::downcast_ref`.

pub mod accumulator;
pub mod algorithm;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod normalize;
pub mod ranking;
pub mod source;
pub mod track;
