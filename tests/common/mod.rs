//! Shared fixtures: an in-memory task board and stub extraction parts.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use case_claimer::config::CoordinatorConfig;
use case_claimer::error::{Error, Result};
use case_claimer::extract::{
    AdapterRegistry, AssetFetcher, AssetNormalizer, Download, ExtractionPipeline, FetchFailure,
    Normalized, ScraperAdapter, host_matches,
};
use case_claimer::model::{LineItem, NOT_SPECIFIED};
use case_claimer::retry::RetryPolicy;
use case_claimer::session::{Field, RowHandle, SessionFactory, TaskBoardSession};
use url::Url;

pub const IDENTITY: &str = "BOT_CLAIMED";

// ---------------------------------------------------------------------------
// Scripted board
// ---------------------------------------------------------------------------

/// Board contents plus a record of what the engine did to it.
#[derive(Debug, Default)]
pub struct Board {
    pub rows: Vec<HashMap<Field, String>>,
    pub hidden: HashSet<usize>,

    /// `open` fails with `SessionInit`.
    pub open_fails: bool,
    /// `verify_ready` answers `false`.
    pub never_ready: bool,
    /// `discover_rows` fails with `SessionDead` from this call on (1-based).
    pub dead_from_discover: Option<usize>,
    /// `claim` fails with `ClaimAttempt`.
    pub claim_fails: bool,
    /// `extract_field` fails with `RowStale` for these row indexes.
    pub stale_rows: HashSet<usize>,
    /// `extract_field` fails with `RowTimeout` for these row indexes.
    pub timeout_rows: HashSet<usize>,
    /// `claim` fails with `ClaimAttempt` for these task ids.
    pub claim_fails_for: HashSet<String>,
    /// `claim` fails with `SessionDead` for these task ids.
    pub claim_dead_for: HashSet<String>,
    /// `navigate_home` fails with `SessionDead` from this call on (1-based).
    pub dead_from_home: Option<usize>,

    pub opened: usize,
    pub discover_calls: usize,
    /// Row indexes `extract_field` was called on.
    pub read_rows: HashSet<usize>,
    pub claimed: Vec<String>,
    pub homes: usize,
    pub closed: bool,
}

impl Board {
    pub fn with_rows(rows: Vec<HashMap<Field, String>>) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            rows,
            ..Self::default()
        }))
    }
}

pub fn row(id: &str, country: &str, status: &str, owner: &str) -> HashMap<Field, String> {
    let mut fields = HashMap::new();
    fields.insert(Field::TaskId, id.to_string());
    fields.insert(Field::Country, country.to_string());
    fields.insert(Field::Status, status.to_string());
    fields.insert(Field::Owner, owner.to_string());
    fields.insert(Field::AccountName, format!("Account {id}"));
    fields.insert(Field::CaseTitle, format!("Menu update {id}"));
    fields.insert(Field::MenuLink, format!("https://menu.test/{id}"));
    fields
}

pub struct ScriptedSession {
    board: Arc<Mutex<Board>>,
}

#[async_trait]
impl TaskBoardSession for ScriptedSession {
    async fn verify_ready(&self) -> Result<bool> {
        Ok(!self.board.lock().unwrap().never_ready)
    }

    async fn discover_rows(&self) -> Result<Vec<RowHandle>> {
        let mut board = self.board.lock().unwrap();
        board.discover_calls += 1;
        if board.dead_from_discover.is_some_and(|n| board.discover_calls >= n) {
            return Err(Error::SessionDead("chrome not reachable".to_string()));
        }
        Ok((0..board.rows.len())
            .map(|index| RowHandle {
                index,
                element: format!("row-{index}"),
            })
            .collect())
    }

    async fn ensure_visible(&self, row: &RowHandle) -> Result<bool> {
        Ok(!self.board.lock().unwrap().hidden.contains(&row.index))
    }

    async fn extract_field(&self, row: &RowHandle, field: Field) -> Result<String> {
        let mut board = self.board.lock().unwrap();
        board.read_rows.insert(row.index);
        if board.stale_rows.contains(&row.index) {
            return Err(Error::RowStale(format!("row {}", row.index)));
        }
        if board.timeout_rows.contains(&row.index) {
            return Err(Error::RowTimeout(format!("row {}", row.index)));
        }
        let fields = board
            .rows
            .get(row.index)
            .ok_or_else(|| Error::RowStale(format!("row {}", row.index)))?;
        Ok(fields
            .get(&field)
            .cloned()
            .unwrap_or_else(|| NOT_SPECIFIED.to_string()))
    }

    async fn claim(&self, row: &RowHandle) -> Result<()> {
        let mut board = self.board.lock().unwrap();
        let id = board
            .rows
            .get(row.index)
            .and_then(|fields| fields.get(&Field::TaskId))
            .cloned()
            .unwrap_or_default();
        if board.claim_dead_for.contains(&id) {
            return Err(Error::SessionDead("window closed mid-claim".to_string()));
        }
        if board.claim_fails || board.claim_fails_for.contains(&id) {
            return Err(Error::ClaimAttempt("start task button missing".to_string()));
        }
        let fields = board
            .rows
            .get_mut(row.index)
            .ok_or_else(|| Error::RowStale(format!("row {}", row.index)))?;
        fields.insert(Field::Owner, IDENTITY.to_string());
        fields.insert(Field::Status, "In Progress".to_string());
        board.claimed.push(id);
        Ok(())
    }

    async fn navigate_home(&self) -> Result<()> {
        let mut board = self.board.lock().unwrap();
        board.homes += 1;
        if board.dead_from_home.is_some_and(|n| board.homes >= n) {
            return Err(Error::SessionDead("home view unreachable".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.board.lock().unwrap().closed = true;
        Ok(())
    }
}

pub struct ScriptedFactory {
    pub board: Arc<Mutex<Board>>,
}

impl ScriptedFactory {
    pub fn new(board: &Arc<Mutex<Board>>) -> Arc<Self> {
        Arc::new(Self {
            board: Arc::clone(board),
        })
    }

    pub fn session(&self) -> ScriptedSession {
        ScriptedSession {
            board: Arc::clone(&self.board),
        }
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self) -> Result<Box<dyn TaskBoardSession>> {
        let mut board = self.board.lock().unwrap();
        if board.open_fails {
            return Err(Error::SessionInit("profile directory missing".to_string()));
        }
        board.opened += 1;
        Ok(Box::new(self.session()))
    }
}

/// Fast cycles so engine tests finish in milliseconds.
pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        identity: IDENTITY.to_string(),
        cycle_budget: Duration::from_millis(20),
        min_sleep: Duration::from_millis(5),
        stop_slice: Duration::from_millis(5),
        row_visibility: RetryPolicy::attempts(1, Duration::from_millis(1), 1.0),
        ..CoordinatorConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Stub extraction parts
// ---------------------------------------------------------------------------

pub struct StubAdapter {
    pub items: Vec<LineItem>,
}

#[async_trait]
impl ScraperAdapter for StubAdapter {
    fn name(&self) -> &str {
        "stub"
    }

    fn handles(&self, url: &Url) -> bool {
        host_matches(url, "menu.test")
    }

    async fn scrape(&self, _url: &Url) -> Result<Vec<LineItem>> {
        Ok(self.items.clone())
    }
}

/// Serves canned responses keyed by URL. Unknown URLs are 404s.
#[derive(Default)]
pub struct StubFetcher {
    pub responses: HashMap<String, std::result::Result<Download, FetchFailure>>,
}

impl StubFetcher {
    pub fn serve(mut self, url: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.responses.insert(
            url.to_string(),
            Ok(Download {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            }),
        );
        self
    }

    pub fn fail(mut self, url: &str, failure: FetchFailure) -> Self {
        self.responses.insert(url.to_string(), Err(failure));
        self
    }
}

#[async_trait]
impl AssetFetcher for StubFetcher {
    async fn fetch(
        &self,
        url: &Url,
        _referer: Option<&Url>,
    ) -> std::result::Result<Download, FetchFailure> {
        self.responses
            .get(url.as_str())
            .cloned()
            .unwrap_or(Err(FetchFailure::Status(404)))
    }
}

/// Passes bytes through, except `b"heic"` (needs a converter) and
/// `b"broken"`.
pub struct StubNormalizer;

#[async_trait]
impl AssetNormalizer for StubNormalizer {
    async fn normalize(&self, bytes: &[u8]) -> Normalized {
        match bytes {
            b"heic" => Normalized::Unavailable,
            b"broken" => Normalized::Failed("decode error".to_string()),
            other => Normalized::Image(other.to_vec()),
        }
    }
}

pub fn line_item(id: &str, image_url: Option<&str>) -> LineItem {
    LineItem {
        id: id.to_string(),
        section: Some("Mains".to_string()),
        price: Some("12.50 EUR".to_string()),
        name: Some(id.to_string()),
        description: Some(format!("{id} description")),
        image_url: image_url.map(str::to_string),
    }
}

pub fn stub_pipeline(items: Vec<LineItem>, fetcher: StubFetcher) -> ExtractionPipeline {
    ExtractionPipeline::new(
        AdapterRegistry::new().with(Arc::new(StubAdapter { items })),
        Arc::new(fetcher),
        Arc::new(StubNormalizer),
    )
}
