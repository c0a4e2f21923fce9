//! Typed configuration from environment variables.
//!
//! Loads once at startup. The board URL carries the app id, so it is held as
//! a `SecretString`; only commands that talk to the board require it.

pub mod selectors;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use secrecy::SecretString;

pub use selectors::BoardSelectors;

/// Identity the engine writes as the owner of its own claims.
pub const DEFAULT_IDENTITY: &str = "BOT_CLAIMED";

#[derive(Debug)]
pub struct Config {
    board_url: Option<SecretString>,
    pub webdriver_url: String,
    pub profile_dir: Option<PathBuf>,
    pub profile_name: String,
    pub identity: String,
    pub activity_log_path: PathBuf,
    pub snapshot_dir: PathBuf,
    pub selectors_file: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            board_url: optional_var("BOARD_URL").map(SecretString::from),
            webdriver_url: var_or("WEBDRIVER_URL", "http://localhost:9515"),
            profile_dir: optional_var("BROWSER_PROFILE_DIR").map(PathBuf::from),
            profile_name: var_or("BROWSER_PROFILE", "Default"),
            identity: var_or("CLAIMER_IDENTITY", DEFAULT_IDENTITY),
            activity_log_path: PathBuf::from(var_or("ACTIVITY_LOG_PATH", "case_activity_log.csv")),
            snapshot_dir: PathBuf::from(var_or("SNAPSHOT_DIR", ".")),
            selectors_file: optional_var("SELECTORS_FILE").map(PathBuf::from),
            ffmpeg_path: optional_var("FFMPEG_PATH").map(PathBuf::from),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: var_or("LOG_LEVEL", "info"),
        })
    }

    /// The task board URL.
    ///
    /// # Errors
    ///
    /// `Error::Config` when `BOARD_URL` is unset.
    pub fn board_url(&self) -> Result<&SecretString> {
        self.board_url
            .as_ref()
            .ok_or_else(|| Error::Config("required environment variable BOARD_URL is not set".to_string()))
    }

    /// Replace the board URL, mainly for tests and one-off runs.
    pub fn with_board_url(mut self, url: impl Into<String>) -> Self {
        self.board_url = Some(SecretString::from(url.into()));
        self
    }

    /// Board selectors: the TOML override when configured, built-ins otherwise.
    pub fn selectors(&self) -> Result<BoardSelectors> {
        match &self.selectors_file {
            Some(path) => BoardSelectors::load(path),
            None => Ok(BoardSelectors::default()),
        }
    }

    /// Coordinator settings derived from this config.
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            identity: self.identity.clone(),
            ..CoordinatorConfig::default()
        }
    }
}

/// Tunables for the claim loop.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Owner identity for the engine's own claims.
    pub identity: String,
    /// Status a row must show to be claimable.
    pub claimable_status: String,
    /// Status recorded for a fresh claim.
    pub claimed_status: String,
    /// Status recorded when a claim is finished.
    pub finished_status: String,
    /// Lowercased statuses worth recording when someone else owns the row.
    pub observed_statuses: Vec<String>,
    /// Target wall time of one poll cycle, processing included.
    pub cycle_budget: Duration,
    /// Shortest sleep between cycles.
    pub min_sleep: Duration,
    /// Granularity at which the sleep checks for a stop request.
    pub stop_slice: Duration,
    /// Scroll-and-check attempts before a row is skipped.
    pub row_visibility: RetryPolicy,
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.to_string(),
            claimable_status: "Not Started".to_string(),
            claimed_status: "In Progress".to_string(),
            finished_status: "Completed".to_string(),
            observed_statuses: vec![
                "inprogress".to_string(),
                "escalated".to_string(),
                "completed".to_string(),
            ],
            cycle_budget: Duration::from_secs(7),
            min_sleep: Duration::from_millis(100),
            stop_slice: Duration::from_millis(50),
            row_visibility: RetryPolicy::attempts(2, Duration::from_millis(750), 1.67),
            event_capacity: 64,
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(name: &str, default: &str) -> String {
    optional_var(name).unwrap_or_else(|| default.to_string())
}
