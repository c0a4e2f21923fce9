//! Error types for case-claimer.
//!
//! The variants mirror how the claim loop reacts to a failure: fatal session
//! errors stop the engine, row-level errors skip one row, everything else is
//! logged and the loop carries on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The remote session could not be opened or never became ready.
    #[error("session init failed: {0}")]
    SessionInit(String),

    /// The automation endpoint stopped responding mid-loop.
    #[error("session dead: {0}")]
    SessionDead(String),

    /// A row handle no longer refers to a live row.
    #[error("row stale: {0}")]
    RowStale(String),

    #[error("row timeout: {0}")]
    RowTimeout(String),

    /// Clicking through a claim failed; the row is abandoned for this cycle.
    #[error("claim attempt failed: {0}")]
    ClaimAttempt(String),

    #[error("extraction pipeline: {0}")]
    ExtractionPipeline(String),

    #[error("activity log: {0}")]
    LogPersistence(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors after which the session cannot be used again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::SessionInit(_) | Error::SessionDead(_))
    }

    /// Errors that invalidate a single row but not the session.
    pub fn is_row_level(&self) -> bool {
        matches!(self, Error::RowStale(_) | Error::RowTimeout(_))
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SessionInit(_) => "session_init",
            Error::SessionDead(_) => "session_dead",
            Error::RowStale(_) => "row_stale",
            Error::RowTimeout(_) => "row_timeout",
            Error::ClaimAttempt(_) => "claim_attempt",
            Error::ExtractionPipeline(_) => "extraction",
            Error::LogPersistence(_) => "log_persistence",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Csv(_) => "csv",
            Error::Http(_) => "http",
            Error::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
