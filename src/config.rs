//! # Configuration Module
//!
//! Platform-appropriate locations for trackrank's files, and the persisted
//! defaults for ranking requests.
//!
//! ## Locations
//!
//! - Config file: `<config_dir>/trackrank/config.json`
//!   (`~/.config/trackrank/config.json` on Linux)
//! - Library database: `<data_dir>/trackrank/library.db`
//!   (`~/.local/share/trackrank/library.db` on Linux)
//!
//! A missing config file is not an error: every field has a default, and
//! any field left out of the file falls back to its default as well.

use crate::algorithm::{Timeframe, TrackCount, Weights};
use crate::ranking::{Algorithm, RankRequest};
use anyhow::{Context, Result};
use log::debug;
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "trackrank";

/// Returns the platform data directory for trackrank, creating it if needed.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The trackrank subdirectory cannot be created due to permissions
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. \
             Please ensure your platform supports standard data directories."
        )
    })?;

    let app_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create trackrank data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir)
}

/// Default location of the library database.
///
/// # Errors
///
/// See [`get_data_dir`].
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("library.db"))
}

/// Default location of the config file. The directory is not created here;
/// [`AppConfig::save`] does that.
///
/// # Errors
///
/// Fails when the system config directory cannot be determined.
pub fn get_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        anyhow::anyhow!("Could not determine system config directory.")
    })?;
    Ok(config_dir.join(APP_DIR).join("config.json"))
}

/// Make a user-supplied path absolute relative to the working directory,
/// so log and error messages name the file unambiguously.
///
/// # Errors
///
/// Fails when the working directory cannot be read.
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    Ok(path
        .absolutize()
        .with_context(|| format!("Failed to resolve path {}", path.display()))?
        .into_owned())
}

/// Persisted defaults for `trackrank rank`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub weights: Weights,
    pub timeframe: Timeframe,
    pub track_count: TrackCount,
    pub algorithm: Algorithm,
    /// Replace a failed weighted ranking with the platform's own list.
    pub fallback_to_platform: bool,
    /// Library location; `None` means [`get_db_path`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let request = RankRequest::default();
        Self {
            weights: request.weights,
            timeframe: request.timeframe,
            track_count: request.count,
            algorithm: request.algorithm,
            fallback_to_platform: request.fallback_to_platform,
            db_path: None,
        }
    }
}

impl AppConfig {
    /// Load the config at `path`, or the defaults when it does not exist.
    ///
    /// Every field is optional. Missing fields, including single weights
    /// inside `weights`, take their default values, so a config holding only
    /// `{"timeframe": "recent"}` is complete.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The file exists but cannot be read
    /// - The file is not valid JSON, or a field has the wrong type
    /// - `track_count` is not one of 10, 20, 30 or 50
    /// - `timeframe` or `algorithm` names an unknown value
    /// - A weight is negative or non-finite, or overflows once scaled for
    ///   the `recent` window
    ///
    /// # Examples
    ///
    /// ```
    /// use trackrank::algorithm::Timeframe;
    /// use trackrank::config::AppConfig;
    ///
    /// let dir = tempfile::TempDir::new()?;
    /// let path = dir.path().join("config.json");
    /// assert_eq!(AppConfig::load(&path)?, AppConfig::default());
    ///
    /// std::fs::write(&path, r#"{"timeframe": "recent", "weights": {"recency": 6}}"#)?;
    /// let config = AppConfig::load(&path)?;
    /// assert_eq!(config.timeframe, Timeframe::Recent);
    /// assert_eq!(config.weights.recency, 6.0);
    /// assert_eq!(config.weights.play_count, 10.0);
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config JSON in {}", path.display()))?;
        config
            .weights
            .validate()
            .with_context(|| format!("Invalid weights in {}", path.display()))?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Fails when the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json + "\n")
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Library path from the config, or the platform default.
    ///
    /// # Errors
    ///
    /// See [`get_db_path`].
    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => resolve_path(path),
            None => get_db_path(),
        }
    }

    /// The request these defaults describe.
    #[must_use]
    pub fn request(&self) -> RankRequest {
        RankRequest {
            count: self.track_count,
            timeframe: self.timeframe,
            weights: self.weights,
            algorithm: self.algorithm,
            fallback_to_platform: self.fallback_to_platform,
        }
    }
}
