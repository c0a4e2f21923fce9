use std::time::Duration;

use case_claimer::config::{BoardSelectors, Config, CoordinatorConfig, DEFAULT_IDENTITY};
use case_claimer::session::Field;
use secrecy::ExposeSecret;

// Env vars are process-wide, so every env assertion lives in one test.
#[test]
fn config_from_env_defaults_and_board_url() {
    unsafe {
        std::env::remove_var("BOARD_URL");
        std::env::remove_var("CLAIMER_IDENTITY");
        std::env::set_var("ACTIVITY_LOG_PATH", "/tmp/claimer-test/activity.csv");
        std::env::set_var("LOG_LEVEL", "   ");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.identity, DEFAULT_IDENTITY);
    assert_eq!(config.log_level, "info", "blank values fall back to defaults");
    assert_eq!(
        config.activity_log_path.to_str(),
        Some("/tmp/claimer-test/activity.csv")
    );
    assert!(config.board_url().is_err(), "board url is only required on use");

    unsafe {
        std::env::set_var("BOARD_URL", "https://www.appsheet.com/start/abc#view=Pending");
        std::env::set_var("CLAIMER_IDENTITY", "ops-bot");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(
        config.board_url().unwrap().expose_secret(),
        "https://www.appsheet.com/start/abc#view=Pending"
    );
    assert_eq!(config.coordinator().identity, "ops-bot");
    assert!(!format!("{config:?}").contains("abc#view"), "board url is redacted");

    unsafe {
        std::env::remove_var("BOARD_URL");
        std::env::remove_var("CLAIMER_IDENTITY");
        std::env::remove_var("ACTIVITY_LOG_PATH");
        std::env::remove_var("LOG_LEVEL");
    }
}

#[test]
fn coordinator_defaults() {
    let config = CoordinatorConfig::default();
    assert_eq!(config.claimable_status, "Not Started");
    assert_eq!(config.claimed_status, "In Progress");
    assert_eq!(config.finished_status, "Completed");
    assert_eq!(config.cycle_budget, Duration::from_secs(7));
    assert!(config.observed_statuses.contains(&"escalated".to_string()));
}

#[test]
fn selectors_override_from_toml() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("selectors.toml");
    std::fs::write(
        &path,
        r#"
row_xpath = "//tr[@class='case']"
column_xpath_template = ".//td[@data-col='{column}']"
ready_timeout_secs = 5
"#,
    )
    .unwrap();

    let selectors = BoardSelectors::load(&path).unwrap();
    let defaults = BoardSelectors::default();
    assert_eq!(selectors.row_xpath, "//tr[@class='case']");
    assert_eq!(selectors.ready_timeout(), Duration::from_secs(5));
    assert_eq!(
        selectors.column_xpath(Field::TaskId.column()),
        ".//td[@data-col='Main Task ID']"
    );
    assert_eq!(selectors.start_task_xpath, defaults.start_task_xpath);
    assert_eq!(selectors.rows_timeout(), defaults.rows_timeout());
    assert_eq!(
        selectors.value_xpath(Field::Owner.kind()),
        defaults.email_span_xpath
    );
}

#[test]
fn bad_selectors_file_is_a_config_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("selectors.toml");
    std::fs::write(&path, "ready_timeout_secs = \"soon\"").unwrap();
    let err = BoardSelectors::load(&path).unwrap_err();
    assert_eq!(err.kind(), "config");

    let missing = BoardSelectors::load(&dir.path().join("absent.toml")).unwrap_err();
    assert_eq!(missing.kind(), "config");
}
