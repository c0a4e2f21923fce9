//! Reporting queries over the activity log.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use super::LogEntry;

/// Status value that counts towards the leaderboard, compared lowercased.
pub const IN_PROGRESS: &str = "inprogress";

/// One owner's score: distinct cases moved to in-progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardRow {
    pub owner: String,
    /// Counted case ids, in the order they were counted.
    pub cases: Vec<String>,
}

impl LeaderboardRow {
    pub fn count(&self) -> usize {
        self.cases.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    /// Rows written for the engine's own identity.
    pub bot_activity: Vec<LogEntry>,
    pub leaderboard: Vec<LeaderboardRow>,
}

/// Rows whose Date column equals `date`.
pub fn on_date(entries: &[LogEntry], date: NaiveDate) -> Vec<LogEntry> {
    entries
        .iter()
        .filter(|e| e.date == Some(date))
        .cloned()
        .collect()
}

/// Rows dated within `month` of `year`.
pub fn in_month(entries: &[LogEntry], month: u32, year: i32) -> Vec<LogEntry> {
    entries
        .iter()
        .filter(|e| e.date.is_some_and(|d| d.month() == month && d.year() == year))
        .cloned()
        .collect()
}

fn is_identity(owner: &str, identity: &str) -> bool {
    owner
        .to_ascii_lowercase()
        .contains(&identity.to_ascii_lowercase())
}

/// Distinct cases per owner that were seen in progress.
///
/// Each case id is credited once, to the first owner seen with it in progress
/// (rows ordered by case id, then observed time with missing times first).
/// Rows with no owner, `n/a`, or the engine's own identity never score.
pub fn leaderboard(entries: &[LogEntry], identity: &str) -> Vec<LeaderboardRow> {
    let mut rows: Vec<&LogEntry> = entries.iter().collect();
    rows.sort_by(|a, b| {
        a.case_id
            .cmp(&b.case_id)
            .then_with(|| a.observed_at.cmp(&b.observed_at))
    });

    let mut counted: HashSet<&str> = HashSet::new();
    let mut scores: HashMap<&str, Vec<String>> = HashMap::new();
    for row in rows {
        let owner = row.owner.trim();
        if owner.is_empty() || owner.eq_ignore_ascii_case("n/a") || is_identity(owner, identity) {
            continue;
        }
        if row.status.trim().to_ascii_lowercase() != IN_PROGRESS {
            continue;
        }
        if counted.insert(row.case_id.as_str()) {
            scores
                .entry(owner)
                .or_default()
                .push(row.case_id.clone());
        }
    }

    let mut board: Vec<LeaderboardRow> = scores
        .into_iter()
        .map(|(owner, cases)| LeaderboardRow {
            owner: owner.to_string(),
            cases,
        })
        .collect();
    board.sort_by(|a, b| b.count().cmp(&a.count()).then_with(|| a.owner.cmp(&b.owner)));
    board
}

/// The engine's own rows for `date` plus that day's team leaderboard.
pub fn daily_report(entries: &[LogEntry], date: NaiveDate, identity: &str) -> DailyReport {
    let day = on_date(entries, date);
    let bot_activity = day
        .iter()
        .filter(|e| is_identity(&e.owner, identity))
        .cloned()
        .collect();
    let leaderboard = leaderboard(&day, identity);
    DailyReport {
        date,
        bot_activity,
        leaderboard,
    }
}
