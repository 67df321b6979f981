//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `trackrank` binary.
//!
//! ## Commands
//!
//! - `rank`: Rank tracks from a snapshot file or the local library
//! - `import`: Merge a snapshot file into the local library
//! - `stats`: Show what the local library holds
//! - `config`: Create, show or locate the config file
//! - `completion`: Generate shell completions
//!
//! ## Examples
//!
//! ```bash
//! trackrank rank --snapshot export.json --timeframe recent --count 20
//! trackrank import export.json
//! trackrank rank --explain
//! ```

use crate::algorithm::{Timeframe, TrackCount};
use crate::ranking::Algorithm;
use chrono::{DateTime, FixedOffset};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "trackrank")]
#[command(about = "trackrank: blend plays, saved tracks and platform charts into one top list")]
#[command(version)]
pub struct Args {
    /// Config file to read defaults from
    #[arg(long, global = true, env = "TRACKRANK_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Library database to use instead of the configured one
    #[arg(long, global = true, env = "TRACKRANK_DB", value_name = "FILE")]
    pub db_path: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rank tracks
    ///
    /// Blends recent plays, saved tracks and the platform's top list with the
    /// weighted model, or prints the platform's own list with
    /// `--algorithm platform`. Flags override the config file.
    Rank(RankArgs),

    /// Merge a snapshot file into the local library
    ///
    /// History entries already in the library are not duplicated; each
    /// top list in the snapshot replaces the stored one for its window.
    Import {
        /// Snapshot JSON file to import
        #[arg(value_hint = clap::ValueHint::FilePath)]
        snapshot: PathBuf,

        /// Empty the library before importing
        #[arg(long)]
        replace: bool,
    },

    /// Show row counts of the local library
    Stats,

    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    ///
    /// Usage: trackrank completion bash > ~/.local/share/bash-completion/completions/trackrank
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Arguments of `trackrank rank`.
#[derive(ClapArgs, Debug, Default)]
pub struct RankArgs {
    /// Snapshot JSON file to rank from, instead of the local library
    #[arg(short, long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub snapshot: Option<PathBuf>,

    /// Ranking window
    #[arg(short, long, value_enum)]
    pub timeframe: Option<Timeframe>,

    /// Number of tracks: 10, 20, 30 or 50
    #[arg(short, long)]
    pub count: Option<TrackCount>,

    /// Weighted model or the platform's own list
    #[arg(short, long, value_enum)]
    pub algorithm: Option<Algorithm>,

    /// Fail instead of substituting the platform list when ranking fails
    #[arg(long)]
    pub no_fallback: bool,

    /// Weight of the play count factor
    #[arg(long, value_name = "W")]
    pub play_count_weight: Option<f64>,

    /// Weight of the recency factor
    #[arg(long, value_name = "W")]
    pub recency_weight: Option<f64>,

    /// Weight of the saved-track factor
    #[arg(long, value_name = "W")]
    pub user_rating_weight: Option<f64>,

    /// Weight of the time-of-day factor
    #[arg(long, value_name = "W")]
    pub time_of_day_weight: Option<f64>,

    /// Scales the per-timeframe factor
    #[arg(long, value_name = "W")]
    pub timeframe_multiplier: Option<f64>,

    /// Reference time for recency and time-of-day (RFC 3339); defaults to now
    #[arg(long, value_name = "TIME")]
    pub now: Option<DateTime<FixedOffset>>,

    /// Show scores and factor breakdowns
    #[arg(short, long)]
    pub explain: bool,

    /// Print the ranked track payloads as JSON
    #[arg(long, conflicts_with = "explain")]
    pub json: bool,
}

/// Config file actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a config file with the default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective config
    Show,
    /// Print the config file location
    Path,
}
