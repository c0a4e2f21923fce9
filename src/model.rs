//! Core data model.
//!
//! A work item is a single case row seen on the task board. It is rebuilt
//! from the row's field values on every poll; only a claimed item outlives
//! the cycle that produced it.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Default for any field the board row does not carry.
pub const NOT_SPECIFIED: &str = "Not Specified";

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Work category. Each category has exactly one claim slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Portugal,
    Ghana,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Portugal, Category::Ghana];

    /// Label as it appears in the board's "Country" column.
    pub fn label(self) -> &'static str {
        match self {
            Category::Portugal => "Portugal",
            Category::Ghana => "Ghana",
        }
    }

    /// Lowercase form used in export file names.
    pub fn slug(self) -> &'static str {
        match self {
            Category::Portugal => "portugal",
            Category::Ghana => "ghana",
        }
    }

    /// Match a board label exactly. Unknown countries are not claimable.
    pub fn from_label(label: &str) -> Option<Self> {
        Category::ALL.into_iter().find(|c| c.label() == label.trim())
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "portugal" | "pt" => Ok(Category::Portugal),
            "ghana" | "gh" => Ok(Category::Ghana),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A case row as read from the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub category: Category,

    /// "Main Task ID" column, or a fallback derived from the row.
    pub display_id: String,

    /// Status string exactly as the board shows it.
    pub status: String,

    /// Assigned user identity, `NOT_SPECIFIED` when unassigned.
    pub owner: String,

    pub account: String,
    pub title: String,

    /// Linked resources, menu link first then dish-photos link.
    /// Placeholder values are never stored here.
    pub links: Vec<String>,

    pub instructions: String,
    pub request_sent: String,
    pub created_by: String,

    pub observed_at: DateTime<Local>,
    pub claimed_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

impl WorkItem {
    /// First linked resource, used as the log's "Menu Link".
    pub fn primary_link(&self) -> Option<&str> {
        self.links.first().map(String::as_str)
    }

    /// Claim-to-finish duration, once both ends are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.claimed_at, self.finished_at) {
            (Some(claimed), Some(finished)) if finished >= claimed => Some(finished - claimed),
            _ => None,
        }
    }
}

/// True when a field value carries no information.
pub fn is_placeholder(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case("n/a") || v == NOT_SPECIFIED
}

// ---------------------------------------------------------------------------
// Engine State
// ---------------------------------------------------------------------------

/// Lifecycle of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Initializing,
    Monitoring,
    Stopping,
    Stopped,
}

impl EngineState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, to),
            (Idle, Initializing)
                | (Stopped, Initializing)   // restart
                | (Initializing, Monitoring)
                | (Initializing, Stopped)   // open or readiness failed
                | (Initializing, Stopping)  // stop requested during init
                | (Monitoring, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Is a worker alive in this state?
    pub fn is_active(self) -> bool {
        matches!(
            self,
            EngineState::Initializing | EngineState::Monitoring | EngineState::Stopping
        )
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineState::Idle => "idle",
            EngineState::Initializing => "initializing",
            EngineState::Monitoring => "monitoring",
            EngineState::Stopping => "stopping",
            EngineState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Extraction outputs
// ---------------------------------------------------------------------------

/// One line item returned by a scraper adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: String,
    pub section: Option<String>,
    pub price: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// An opaque output payload with a suggested file name.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("filename", &self.filename)
            .field("len", &self.bytes.len())
            .finish()
    }
}
