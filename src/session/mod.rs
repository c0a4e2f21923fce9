//! Task board session: the engine's only window onto the remote board.
//!
//! Implementations own a live automation session. Every call may block on
//! the remote end and runs on the engine's worker only. Errors follow the
//! crate taxonomy: `SessionDead` when the endpoint itself is gone,
//! `RowStale`/`RowTimeout` when one row went away, `ClaimAttempt` when a
//! claim click-through failed.

pub mod webdriver;

use async_trait::async_trait;

use crate::config::selectors::FieldKind;
use crate::error::Result;

pub use webdriver::{WebDriverFactory, WebDriverSession};

/// Columns the engine reads from a board row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    TaskId,
    Status,
    Country,
    Owner,
    AccountName,
    CaseTitle,
    MenuLink,
    PhotosLink,
    Instructions,
    RequestSent,
    CreatedBy,
}

impl Field {
    /// Column name on the board.
    pub fn column(self) -> &'static str {
        match self {
            Field::TaskId => "Main Task ID",
            Field::Status => "Status",
            Field::Country => "Country",
            Field::Owner => "Useremail",
            Field::AccountName => "Account Name",
            Field::CaseTitle => "Case Title",
            Field::MenuLink => "Menu link",
            Field::PhotosLink => "Dish Photos Link",
            Field::Instructions => "Menu instructions",
            Field::RequestSent => "Menu Request Sent Date",
            Field::CreatedBy => "Created By",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::Owner => FieldKind::Email,
            Field::MenuLink | Field::PhotosLink => FieldKind::Url,
            Field::RequestSent => FieldKind::DateTime,
            _ => FieldKind::Text,
        }
    }
}

/// Opaque reference to one row from the latest discovery.
///
/// Handles are only meaningful until the next `discover_rows` or
/// `navigate_home` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowHandle {
    /// Position in discovery order, zero-based.
    pub index: usize,
    /// Implementation-specific element reference.
    pub element: String,
}

#[async_trait]
pub trait TaskBoardSession: Send + Sync {
    /// Wait for the board's loaded indicator.
    ///
    /// `false` means the board never became usable; implementations write a
    /// diagnostic snapshot before returning it.
    async fn verify_ready(&self) -> Result<bool>;

    /// All rows currently on the board, in display order.
    ///
    /// An empty list is a normal answer. An unresponsive endpoint must be
    /// reported as `SessionDead`, never as an empty list.
    async fn discover_rows(&self) -> Result<Vec<RowHandle>>;

    /// Scroll the row into view and report whether it is displayed.
    async fn ensure_visible(&self, row: &RowHandle) -> Result<bool>;

    /// Read one column. Absent values come back as
    /// [`NOT_SPECIFIED`](crate::model::NOT_SPECIFIED); stale-row and
    /// session errors are always returned.
    async fn extract_field(&self, row: &RowHandle, field: Field) -> Result<String>;

    /// The row's own element id, when the board exposes one.
    async fn row_dom_id(&self, _row: &RowHandle) -> Result<Option<String>> {
        Ok(None)
    }

    /// Take ownership of the case behind `row`.
    ///
    /// Invalidates every row handle. Fails with `ClaimAttempt` on click or
    /// confirmation failure and `SessionDead` if the endpoint is gone.
    async fn claim(&self, row: &RowHandle) -> Result<()>;

    /// Return to the pending-tasks view. Safe to call repeatedly.
    async fn navigate_home(&self) -> Result<()>;

    /// Release the remote session.
    async fn close(&self) -> Result<()>;
}

/// Opens sessions. Failures are `SessionInit`.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn TaskBoardSession>>;
}
