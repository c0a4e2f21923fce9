//! Append-only activity log.
//!
//! A CSV table with a fixed column order. Every append reads the whole table
//! as raw cells, adds one row, and rewrites the file, so earlier rows keep
//! their exact text. Cells are only parsed on the way out to reports. There
//! is no partial-write protection: a crash mid-rewrite can lose the file.

pub mod report;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Timelike};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{NOT_SPECIFIED, WorkItem};

pub use report::{DailyReport, LeaderboardRow, daily_report, in_month, leaderboard, on_date};

/// Canonical column order of the persisted table.
pub const COLUMNS: [&str; 13] = [
    "Date",
    "Observed Timestamp",
    "Claimed Timestamp",
    "Finished Timestamp",
    "Duration (seconds)",
    "Duration (HH:MM:SS)",
    "Case Display ID",
    "Country",
    "Assigned User",
    "Status (Observed)",
    "Account Name",
    "Case Title",
    "Menu Link",
];

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw column values of a row owned by someone else.
///
/// The country is kept verbatim, since colleagues also work categories this
/// engine never claims.
#[derive(Debug, Clone)]
pub struct Observation {
    pub case_id: String,
    pub country: String,
    pub owner: String,
    pub status: String,
    pub account: String,
    pub title: String,
    pub link: String,
    pub at: DateTime<Local>,
}

/// One row of the activity log. Immutable once written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogEntry {
    #[serde(rename = "Date", with = "lenient_date")]
    pub date: Option<NaiveDate>,
    #[serde(rename = "Observed Timestamp", with = "lenient_timestamp")]
    pub observed_at: Option<NaiveDateTime>,
    #[serde(rename = "Claimed Timestamp", with = "lenient_timestamp")]
    pub claimed_at: Option<NaiveDateTime>,
    #[serde(rename = "Finished Timestamp", with = "lenient_timestamp")]
    pub finished_at: Option<NaiveDateTime>,
    #[serde(rename = "Duration (seconds)", with = "lenient_seconds")]
    pub duration_secs: Option<i64>,
    #[serde(rename = "Duration (HH:MM:SS)")]
    pub duration_hms: String,
    #[serde(rename = "Case Display ID")]
    pub case_id: String,
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Assigned User")]
    pub owner: String,
    #[serde(rename = "Status (Observed)")]
    pub status: String,
    #[serde(rename = "Account Name")]
    pub account: String,
    #[serde(rename = "Case Title")]
    pub title: String,
    #[serde(rename = "Menu Link")]
    pub link: String,
}

impl LogEntry {
    fn from_item(item: &WorkItem, at: NaiveDateTime) -> Self {
        Self {
            date: Some(at.date()),
            observed_at: Some(at),
            case_id: item.display_id.clone(),
            country: item.category.label().to_string(),
            owner: item.owner.clone(),
            status: item.status.clone(),
            account: item.account.clone(),
            title: item.title.clone(),
            link: item
                .primary_link()
                .unwrap_or(NOT_SPECIFIED)
                .to_string(),
            ..Self::default()
        }
    }

    /// A colleague's row seen on the board.
    pub fn observed(obs: Observation) -> Self {
        let at = whole_seconds(obs.at);
        Self {
            date: Some(at.date()),
            observed_at: Some(at),
            case_id: obs.case_id,
            country: obs.country,
            owner: obs.owner,
            status: obs.status,
            account: obs.account,
            title: obs.title,
            link: obs.link,
            ..Self::default()
        }
    }

    /// The engine's own claim.
    pub fn claimed(item: &WorkItem, identity: &str, status: &str) -> Self {
        let at = whole_seconds(item.claimed_at.unwrap_or(item.observed_at));
        Self {
            claimed_at: Some(at),
            owner: identity.to_string(),
            status: status.to_string(),
            ..Self::from_item(item, at)
        }
    }

    /// The engine's own claim, finished by an operator.
    pub fn finished(item: &WorkItem, identity: &str, status: &str) -> Self {
        let at = whole_seconds(item.finished_at.unwrap_or_else(Local::now));
        let duration = item.duration().map(|d| d.num_seconds());
        Self {
            claimed_at: item.claimed_at.map(whole_seconds),
            finished_at: Some(at),
            duration_secs: duration,
            duration_hms: duration.map(format_duration).unwrap_or_default(),
            owner: identity.to_string(),
            status: status.to_string(),
            ..Self::from_item(item, at)
        }
    }
}

/// Local wall time truncated to the log's one-second resolution.
fn whole_seconds(at: DateTime<Local>) -> NaiveDateTime {
    let naive = at.naive_local();
    naive.with_nanosecond(0).unwrap_or(naive)
}

/// `HH:MM:SS`, hours unbounded.
pub fn format_duration(seconds: i64) -> String {
    let s = seconds.max(0);
    format!("{:02}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60)
}

/// The persisted activity table.
///
/// Appends are serialized by an internal lock so the worker and the observer
/// can both write.
pub struct ActivityLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every row in canonical column order.
    ///
    /// Creates the file with just the header when it does not exist.
    /// Columns missing from an older file come back empty; unknown columns are
    /// ignored. Cells that do not parse read back as `None`.
    pub fn get_all(&self) -> Result<Vec<LogEntry>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let header = StringRecord::from(COLUMNS.to_vec());
        self.read_or_create()?
            .into_iter()
            .map(|row| {
                StringRecord::from(row)
                    .deserialize(Some(&header))
                    .map_err(|e| self.persist_error("read", e))
            })
            .collect()
    }

    /// Append one row and rewrite the table.
    ///
    /// Prior rows are written back cell for cell, reindexed to [`COLUMNS`].
    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let rows = self.read_or_create()?;
        self.write_all(&rows, Some(entry))?;
        debug!(
            case_id = %entry.case_id,
            status = %entry.status,
            rows = rows.len() + 1,
            "activity log appended"
        );
        Ok(())
    }

    /// [`ActivityLog::append`] on the blocking pool, for async callers.
    pub async fn append_async(self: &Arc<Self>, entry: LogEntry) -> Result<()> {
        let log = Arc::clone(self);
        tokio::task::spawn_blocking(move || log.append(&entry))
            .await
            .map_err(|e| Error::LogPersistence(format!("append task: {e}")))?
    }

    /// Raw cells of every row, one per canonical column.
    fn read_or_create(&self) -> Result<Vec<Vec<String>>> {
        if !self.path.exists() {
            self.write_all(&[], None)?;
            info!(path = %self.path.display(), "created activity log");
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.persist_error("open", e))?;
        let headers = reader
            .headers()
            .map_err(|e| self.persist_error("read", e))?
            .clone();
        let positions: Vec<Option<usize>> = COLUMNS
            .iter()
            .map(|column| headers.iter().position(|h| h.trim() == *column))
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| self.persist_error("read", e))?;
            rows.push(
                positions
                    .iter()
                    .map(|pos| pos.and_then(|i| record.get(i)).unwrap_or_default().to_string())
                    .collect(),
            );
        }
        Ok(rows)
    }

    fn write_all(&self, rows: &[Vec<String>], entry: Option<&LogEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::LogPersistence(format!("{}: {e}", parent.display())))?;
        }
        let file = File::create(&self.path)
            .map_err(|e| Error::LogPersistence(format!("{}: {e}", self.path.display())))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer
            .write_record(COLUMNS)
            .map_err(|e| self.persist_error("write", e))?;
        for row in rows {
            writer
                .write_record(row)
                .map_err(|e| self.persist_error("write", e))?;
        }
        if let Some(entry) = entry {
            writer
                .serialize(entry)
                .map_err(|e| self.persist_error("write", e))?;
        }
        writer
            .flush()
            .map_err(|e| Error::LogPersistence(format!("{}: {e}", self.path.display())))
    }

    fn persist_error(&self, op: &str, e: csv::Error) -> Error {
        Error::LogPersistence(format!("{op} {}: {e}", self.path.display()))
    }
}

/// Timestamps that fail to parse read back as empty rather than failing the
/// whole table.
mod lenient_timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(value: &Option<NaiveDateTime>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => s.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string()),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        let raw = raw.trim();
        Ok(NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
            .ok())
    }
}

mod lenient_date {
    use chrono::{NaiveDate, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{DATE_FORMAT, TIMESTAMP_FORMAT};

    pub fn serialize<S: Serializer>(value: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_str(&d.format(DATE_FORMAT).to_string()),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        let raw = raw.trim();
        Ok(NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
                    .ok()
                    .map(|ts| ts.date())
            }))
    }
}

/// Whole seconds. Older files store them as floats such as `3600.0`.
mod lenient_seconds {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<i64>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(secs) => s.serialize_str(&secs.to_string()),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        let raw = raw.trim();
        Ok(raw.parse::<i64>().ok().or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|secs| secs.is_finite())
                .map(|secs| secs.trunc() as i64)
        }))
    }
}
