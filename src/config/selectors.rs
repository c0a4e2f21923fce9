//! XPath selectors and timeouts for the remote task board.
//!
//! The board's markup shifts over time, so every locator lives here and can
//! be overridden from a TOML file without a rebuild. Missing keys keep their
//! built-in values.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// How a column renders its value, which decides the span to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Email,
    Url,
    DateTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoardSelectors {
    /// Every case row in the pending-tasks table.
    pub row_xpath: String,
    /// Any element proving the app finished loading.
    pub loaded_indicator_xpath: String,
    /// Column container inside a row; `{column}` is replaced by the column name.
    pub column_xpath_template: String,
    pub text_span_xpath: String,
    pub email_span_xpath: String,
    pub url_span_xpath: String,
    pub datetime_span_xpath: String,
    /// Detail pane that opens after clicking a row.
    pub action_bar_xpath: String,
    /// Button that assigns the case to the current user.
    pub start_task_xpath: String,
    /// The session is considered redirected away if the URL lacks this.
    pub expected_host: String,

    pub ready_timeout_secs: u64,
    pub rows_timeout_secs: u64,
    pub claim_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Pause after the claim button is pressed, letting the board commit.
    pub settle_after_claim_ms: u64,
}

impl Default for BoardSelectors {
    fn default() -> Self {
        Self {
            row_xpath: "//span[@data-testid='table-view-row' and contains(@class, 'TableViewRow')]"
                .to_string(),
            loaded_indicator_xpath: "//div[@data-testid='appname-and-viewname'] | //div[@title='All Pending Tasks'] | //div[contains(@class,'appsheet-container') and .//div[@role='table']]"
                .to_string(),
            column_xpath_template: ".//div[@data-testonly-column='{column}']".to_string(),
            text_span_xpath: ".//span[@data-testid='text-type-display-span']".to_string(),
            email_span_xpath: ".//span[@data-testid='email-type-display-span']".to_string(),
            url_span_xpath: ".//span[contains(@class, 'UrlTypeDisplay__text')]".to_string(),
            datetime_span_xpath: ".//span[@data-testid='date-time-type-display-span']"
                .to_string(),
            action_bar_xpath: "//div[contains(@class, 'SlideshowPage__action-bar')]".to_string(),
            start_task_xpath: "//span[@data-testonly-action='Start Task' and @data-testid='Start Task' and contains(@class, 'GenericActionButton')]"
                .to_string(),
            expected_host: "appsheet.com".to_string(),
            ready_timeout_secs: 90,
            rows_timeout_secs: 30,
            claim_timeout_secs: 30,
            poll_interval_ms: 500,
            settle_after_claim_ms: 3000,
        }
    }
}

impl BoardSelectors {
    /// Load overrides from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read selectors file {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad selectors file {}: {e}", path.display())))
    }

    pub fn column_xpath(&self, column: &str) -> String {
        self.column_xpath_template.replace("{column}", column)
    }

    pub fn value_xpath(&self, kind: FieldKind) -> &str {
        match kind {
            FieldKind::Text => &self.text_span_xpath,
            FieldKind::Email => &self.email_span_xpath,
            FieldKind::Url => &self.url_span_xpath,
            FieldKind::DateTime => &self.datetime_span_xpath,
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn rows_timeout(&self) -> Duration {
        Duration::from_secs(self.rows_timeout_secs)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_after_claim(&self) -> Duration {
        Duration::from_millis(self.settle_after_claim_ms)
    }
}
