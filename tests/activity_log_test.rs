//! Activity log persistence and the reports built on it.

use case_claimer::activity::{
    self, ActivityLog, COLUMNS, LogEntry, Observation, format_duration,
};
use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use tempfile::TempDir;

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, activity::TIMESTAMP_FORMAT).unwrap()
}

fn observed(case_id: &str, owner: &str, status: &str, when: &str) -> LogEntry {
    let when = at(when);
    LogEntry {
        date: Some(when.date()),
        observed_at: Some(when),
        case_id: case_id.to_string(),
        country: "Portugal".to_string(),
        owner: owner.to_string(),
        status: status.to_string(),
        ..LogEntry::default()
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn absent_file_is_created_with_header() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logs").join("activity.csv");
    let log = ActivityLog::new(&path);

    assert!(log.get_all().unwrap().is_empty());
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.trim_end(), COLUMNS.join(","));
}

#[test]
fn append_preserves_order_and_values() {
    let dir = TempDir::new().unwrap();
    let log = ActivityLog::new(dir.path().join("activity.csv"));

    let first = observed("C-2", "alice@example.com", "InProgress", "2026-03-01 09:00:00");
    let second = observed("C-1", "bob@example.com", "Escalated", "2026-03-01 09:05:00");
    log.append(&first).unwrap();
    log.append(&second).unwrap();

    let rows = log.get_all().unwrap();
    assert_eq!(rows, vec![first, second]);
}

#[test]
fn empty_duration_reads_back_as_none() {
    let dir = TempDir::new().unwrap();
    let log = ActivityLog::new(dir.path().join("activity.csv"));
    log.append(&observed("C-1", "alice@example.com", "InProgress", "2026-03-01 09:00:00"))
        .unwrap();

    let rows = log.get_all().unwrap();
    assert_eq!(rows[0].duration_secs, None);
    assert_eq!(rows[0].duration_hms, "");
    assert_eq!(rows[0].claimed_at, None);
}

#[test]
fn older_files_with_fewer_columns_still_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("activity.csv");
    std::fs::write(
        &path,
        "Date,Case Display ID,Assigned User,Status (Observed),Legacy\n\
         2026-02-10,C-9,carol@example.com,InProgress,x\n\
         not-a-date,C-10,dave@example.com,Completed,y\n",
    )
    .unwrap();
    let log = ActivityLog::new(&path);

    let rows = log.get_all().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2026, 2, 10));
    assert_eq!(rows[0].owner, "carol@example.com");
    assert_eq!(rows[0].country, "");
    assert_eq!(rows[1].date, None);

    // A new append rewrites the file in canonical column order.
    log.append(&observed("C-11", "erin@example.com", "InProgress", "2026-02-11 10:00:00"))
        .unwrap();
    let header = std::fs::read_to_string(&path).unwrap();
    assert!(header.starts_with(&COLUMNS.join(",")));
    assert_eq!(log.get_all().unwrap().len(), 3);
}

#[test]
fn append_leaves_earlier_rows_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("activity.csv");
    let prior = format!(
        "{}\n\
         2025-01-02,2025-01-02 09:00:00,2025-01-02 09:00:00,2025-01-02 10:00:00,3600.0,01:00:00,PT-9,Portugal,BOT_CLAIMED,Completed,\"Tasca, Lda\",Menu,https://menu.test/PT-9\n\
         2025-01-02,02/01/2025 10:00,,,,,GH-1,Ghana,alice@example.com,InProgress,N/A,N/A,N/A\n",
        COLUMNS.join(",")
    );
    std::fs::write(&path, &prior).unwrap();
    let log = ActivityLog::new(&path);

    log.append(&observed("GH-2", "bob@example.com", "InProgress", "2025-01-03 08:00:00"))
        .unwrap();

    let after = std::fs::read_to_string(&path).unwrap();
    let before_lines: Vec<&str> = prior.lines().collect();
    let after_lines: Vec<&str> = after.lines().collect();
    assert_eq!(after_lines.len(), 4);
    assert_eq!(&after_lines[..3], &before_lines[..]);
    assert!(after_lines[3].contains("GH-2"));

    // Parsing happens on read: the float duration still counts.
    let rows = log.get_all().unwrap();
    assert_eq!(rows[0].duration_secs, Some(3600));
    assert_eq!(rows[0].account, "Tasca, Lda");
    assert_eq!(rows[1].observed_at, None);
    assert_eq!(rows[1].date, NaiveDate::from_ymd_opt(2025, 1, 2));
}

#[test]
fn observation_keeps_raw_country() {
    let entry = LogEntry::observed(Observation {
        case_id: "ES-1".to_string(),
        country: "Spain".to_string(),
        owner: "frank@example.com".to_string(),
        status: "Completed".to_string(),
        account: "Tasca".to_string(),
        title: "New menu".to_string(),
        link: "https://menu.test/es".to_string(),
        at: Local.with_ymd_and_hms(2026, 4, 2, 14, 30, 15).unwrap(),
    });
    assert_eq!(entry.country, "Spain");
    assert_eq!(entry.date, NaiveDate::from_ymd_opt(2026, 4, 2));
    assert_eq!(entry.observed_at, Some(at("2026-04-02 14:30:15")));
    assert!(entry.finished_at.is_none());
}

#[test]
fn duration_format_allows_long_claims() {
    assert_eq!(format_duration(0), "00:00:00");
    assert_eq!(format_duration(3_725), "01:02:05");
    assert_eq!(format_duration(90_061), "25:01:01");
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[test]
fn leaderboard_counts_each_case_once() {
    let entries = vec![
        observed("C-1", "alice@example.com", "InProgress", "2026-03-01 09:00:00"),
        observed("C-1", "alice@example.com", "InProgress", "2026-03-01 09:10:00"),
        observed("C-1", "bob@example.com", "inprogress ", "2026-03-01 09:20:00"),
        observed("C-2", "bob@example.com", "InProgress", "2026-03-01 10:00:00"),
        observed("C-3", "bob@example.com", "InProgress", "2026-03-01 11:00:00"),
        observed("C-4", "carol@example.com", "Completed", "2026-03-01 11:00:00"),
    ];

    let board = activity::leaderboard(&entries, "BOT_CLAIMED");
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].owner, "bob@example.com");
    assert_eq!(board[0].cases, vec!["C-2".to_string(), "C-3".to_string()]);
    assert_eq!(board[1].owner, "alice@example.com");
    assert_eq!(board[1].count(), 1);
}

#[test]
fn leaderboard_credits_earliest_observation() {
    let entries = vec![
        observed("C-1", "late@example.com", "InProgress", "2026-03-01 12:00:00"),
        observed("C-1", "early@example.com", "InProgress", "2026-03-01 08:00:00"),
    ];
    let board = activity::leaderboard(&entries, "BOT_CLAIMED");
    assert_eq!(board.len(), 1);
    assert_eq!(board[0].owner, "early@example.com");
}

#[test]
fn leaderboard_skips_unowned_and_own_rows() {
    let entries = vec![
        observed("C-1", "", "InProgress", "2026-03-01 09:00:00"),
        observed("C-2", "N/A", "InProgress", "2026-03-01 09:00:00"),
        observed("C-3", "bot_claimed", "InProgress", "2026-03-01 09:00:00"),
    ];
    assert!(activity::leaderboard(&entries, "BOT_CLAIMED").is_empty());
}

#[test]
fn leaderboard_ties_break_by_owner() {
    let entries = vec![
        observed("C-1", "zoe@example.com", "InProgress", "2026-03-01 09:00:00"),
        observed("C-2", "amy@example.com", "InProgress", "2026-03-01 09:00:00"),
    ];
    let board = activity::leaderboard(&entries, "BOT_CLAIMED");
    let owners: Vec<&str> = board.iter().map(|r| r.owner.as_str()).collect();
    assert_eq!(owners, vec!["amy@example.com", "zoe@example.com"]);
}

#[test]
fn daily_and_monthly_filters() {
    let mut own = observed("C-9", "BOT_CLAIMED", "In Progress", "2026-03-01 09:30:00");
    own.claimed_at = own.observed_at;
    let entries = vec![
        own,
        observed("C-1", "alice@example.com", "InProgress", "2026-03-01 09:00:00"),
        observed("C-2", "alice@example.com", "InProgress", "2026-03-02 09:00:00"),
        observed("C-3", "bob@example.com", "InProgress", "2026-04-01 09:00:00"),
    ];

    let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
    let report = activity::daily_report(&entries, day, "BOT_CLAIMED");
    assert_eq!(report.bot_activity.len(), 1);
    assert_eq!(report.bot_activity[0].case_id, "C-9");
    assert_eq!(report.leaderboard.len(), 1);
    assert_eq!(report.leaderboard[0].cases, vec!["C-1".to_string()]);

    let march = activity::leaderboard(&activity::in_month(&entries, 3, 2026), "BOT_CLAIMED");
    assert_eq!(march.len(), 1);
    assert_eq!(march[0].count(), 2);

    assert!(activity::in_month(&entries, 3, 2025).is_empty());
}
