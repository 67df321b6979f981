//! # trackrank
//!
//! Command-line front end for the ranking engine. Ranks from a snapshot of
//! platform responses or from the local library built up by `import`.
//!
//! ## Usage
//!
//! ```bash
//! # Rank straight from an export
//! trackrank rank --snapshot export.json --timeframe recent
//!
//! # Keep history across exports, then rank from the library
//! trackrank import export.json
//! trackrank rank --timeframe medium_term --count 20 --explain
//!
//! # Persist defaults
//! trackrank config init
//! ```

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, FixedOffset, Local};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use trackrank::algorithm::statistics::analyze_score_distribution;
use trackrank::cli::{self, Command, ConfigAction, RankArgs};
use trackrank::completion;
use trackrank::config::{self, AppConfig};
use trackrank::db::LibraryDb;
use trackrank::ranking::{PlatformReason, RankReport, RankRequest, TrackRanker};
use trackrank::source::{Snapshot, SnapshotSource, TrackSource};

/// Main entry point.
///
/// Logging is controlled via `RUST_LOG`:
/// - `RUST_LOG=debug trackrank rank` - Show fetch and fold progress
/// - `RUST_LOG=trackrank::normalize=warn trackrank rank` - Only malformed-record warnings
fn main() -> Result<()> {
    env_logger::init();

    let cli::Args {
        config,
        db_path,
        command,
    } = cli::Args::parse();

    match command {
        Command::Rank(rank) => {
            let app_config = AppConfig::load(&config_path(config.as_deref())?)?;
            run_rank(&app_config, db_path.as_deref(), rank)?;
        }
        Command::Import { snapshot, replace } => {
            let app_config = AppConfig::load(&config_path(config.as_deref())?)?;
            let library = library_path(&app_config, db_path.as_deref())?;
            let snapshot_path = config::resolve_path(&snapshot)?;
            info!(
                "Importing {} into {}",
                snapshot_path.display(),
                library.display()
            );

            let snapshot = Snapshot::load(&snapshot_path)?;
            if let Some(parent) = library.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create library directory {}", parent.display())
                })?;
            }
            let mut db = LibraryDb::open(&library)?;
            if replace {
                db.clear()?;
            }
            let summary = db.import_snapshot(&snapshot)?;

            println!(
                "Imported {} plays, {} saved tracks and {} top lists into {}",
                summary.plays_added,
                summary.saved_added,
                summary.windows_replaced,
                library.display()
            );
            if summary.skipped > 0 {
                println!("Skipped {} malformed records", summary.skipped);
            }
        }
        Command::Stats => {
            let app_config = AppConfig::load(&config_path(config.as_deref())?)?;
            let library = existing_library(&app_config, db_path.as_deref())?;
            let stats = LibraryDb::open(&library)?.stats()?;

            println!("Library: {}", library.display());
            println!("  Tracks:       {}", stats.tracks);
            println!("  Plays:        {}", stats.plays);
            println!("  Saved:        {}", stats.saved);
            println!("  short_term:   {}", stats.short_term);
            println!("  medium_term:  {}", stats.medium_term);
            println!("  long_term:    {}", stats.long_term);
        }
        Command::Config { action } => {
            let path = config_path(config.as_deref())?;
            match action {
                ConfigAction::Init { force } => {
                    ensure!(
                        force || !path.exists(),
                        "Config {} already exists; pass --force to overwrite it",
                        path.display()
                    );
                    AppConfig::default().save(&path)?;
                    println!("Wrote default config to {}", path.display());
                }
                ConfigAction::Show => {
                    let app_config = AppConfig::load(&path)?;
                    println!("{}", serde_json::to_string_pretty(&app_config)?);
                }
                ConfigAction::Path => println!("{}", path.display()),
            }
        }
        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            let shell = completion::shell_to_completion_shell(shell);
            completion::generate_completions(shell, &mut cmd);
        }
    }

    Ok(())
}

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => config::resolve_path(path),
        None => config::get_config_path(),
    }
}

fn library_path(app_config: &AppConfig, explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => config::resolve_path(path),
        None => app_config.db_path(),
    }
}

/// Like [`library_path`], but refuses to create an empty library as a side effect.
fn existing_library(app_config: &AppConfig, explicit: Option<&Path>) -> Result<PathBuf> {
    let path = library_path(app_config, explicit)?;
    ensure!(
        path.exists(),
        "No library at {}. Run `trackrank import <snapshot.json>` first, or rank with --snapshot",
        path.display()
    );
    Ok(path)
}

fn build_request(app_config: &AppConfig, rank: &RankArgs) -> RankRequest {
    let mut request = app_config.request();
    if let Some(timeframe) = rank.timeframe {
        request.timeframe = timeframe;
    }
    if let Some(count) = rank.count {
        request.count = count;
    }
    if let Some(algorithm) = rank.algorithm {
        request.algorithm = algorithm;
    }
    if rank.no_fallback {
        request.fallback_to_platform = false;
    }

    let weights = &mut request.weights;
    if let Some(value) = rank.play_count_weight {
        weights.play_count = value;
    }
    if let Some(value) = rank.recency_weight {
        weights.recency = value;
    }
    if let Some(value) = rank.user_rating_weight {
        weights.user_rating = value;
    }
    if let Some(value) = rank.time_of_day_weight {
        weights.time_of_day = value;
    }
    if let Some(value) = rank.timeframe_multiplier {
        weights.timeframe_multiplier = value;
    }
    request
}

fn run_rank(app_config: &AppConfig, db_path: Option<&Path>, rank: RankArgs) -> Result<()> {
    let request = build_request(app_config, &rank);
    let now: DateTime<FixedOffset> = rank.now.unwrap_or_else(|| Local::now().fixed_offset());
    debug!("Ranking at {now} with {request:?}");

    let source: Box<dyn TrackSource> = match &rank.snapshot {
        Some(path) => Box::new(SnapshotSource::open(config::resolve_path(path)?)?),
        None => Box::new(LibraryDb::open(&existing_library(app_config, db_path)?)?),
    };

    info!(
        "Ranking {} {} tracks with the {:?} algorithm",
        request.count, request.timeframe, request.algorithm
    );
    let report = TrackRanker::new(source).load(&request, now)?;

    if report.is_empty() {
        eprintln!("No tracks to rank for {}", request.timeframe);
        return Ok(());
    }

    if rank.json {
        println!("{}", serde_json::to_string_pretty(&report.into_tracks())?);
    } else if rank.explain {
        print_explained(&report, &request);
    } else {
        for (position, track) in report.into_tracks().iter().enumerate() {
            println!("{:>2}. {}", position + 1, track.label());
        }
    }
    Ok(())
}

fn print_explained(report: &RankReport, request: &RankRequest) {
    match report {
        RankReport::Weighted {
            ranked,
            candidates,
            skipped,
        } => {
            println!(
                "Weighted {} ranking: {} of {candidates} candidates",
                request.timeframe,
                ranked.len()
            );
            if *skipped > 0 {
                println!("Skipped {skipped} malformed records");
            }
            println!();

            for (position, entry) in ranked.iter().enumerate() {
                let factors = &entry.factors;
                println!(
                    "{:>2}. {:>8.3}  {}",
                    position + 1,
                    entry.score,
                    entry.track.label()
                );
                println!(
                    "              plays {:.2}  recency {:.2}  saved {:.2}  time of day {:.2}",
                    factors.play_count, factors.recency, factors.user_rating, factors.time_of_day
                );
            }

            if let Some(stats) = analyze_score_distribution(ranked) {
                println!();
                println!(
                    "Scores: mean {:.3}, std dev {:.3}, range {:.3} to {:.3}",
                    stats.mean, stats.std_deviation, stats.min, stats.max
                );
            }
        }
        RankReport::Platform { tracks, reason } => {
            let why = match reason {
                PlatformReason::Requested => "platform algorithm requested".to_string(),
                PlatformReason::EmptyShortTerm => "no primary tracks for short_term".to_string(),
                PlatformReason::WeightedFailed(message) => {
                    format!("weighted ranking failed: {message}")
                }
            };
            println!("Platform {} list ({why})", request.timeframe);
            println!();
            for (position, track) in tracks.iter().enumerate() {
                println!("{:>2}. {}", position + 1, track.label());
            }
        }
    }
}
