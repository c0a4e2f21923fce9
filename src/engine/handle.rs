//! Observer-facing engine handle.
//!
//! The observer never touches the session. It starts and stops the worker,
//! polls [`Engine::snapshot`] and [`Engine::poll_events`] on its own cadence,
//! and finishes claims directly against the shared state.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Local, NaiveDate};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::command::CommandChannel;
use super::coordinator::ClaimCoordinator;
use super::shared::{Severity, SharedState, Snapshot};
use crate::activity::{self, ActivityLog, DailyReport, LeaderboardRow, LogEntry};
use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventChannel};
use crate::extract::ExtractionPipeline;
use crate::model::{Artifact, Category, EngineState, WorkItem};
use crate::session::SessionFactory;

pub struct Engine {
    factory: Arc<dyn SessionFactory>,
    shared: Arc<SharedState>,
    events: Arc<EventChannel>,
    log: Arc<ActivityLog>,
    pipeline: Option<Arc<ExtractionPipeline>>,
    commands: CommandChannel,
    config: CoordinatorConfig,
    worker: Mutex<Option<JoinHandle<EngineState>>>,
}

impl Engine {
    pub fn new(factory: Arc<dyn SessionFactory>, log: Arc<ActivityLog>, config: CoordinatorConfig) -> Self {
        Self {
            factory,
            shared: Arc::new(SharedState::new()),
            events: Arc::new(EventChannel::new(config.event_capacity)),
            log,
            pipeline: None,
            commands: CommandChannel::new(),
            config,
            worker: Mutex::new(None),
        }
    }

    /// Run the extraction pipeline on every claim.
    pub fn with_pipeline(mut self, pipeline: Arc<ExtractionPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn activity_log(&self) -> &ActivityLog {
        &self.log
    }

    /// Spawn the worker. Must be called inside a Tokio runtime.
    ///
    /// Clears slots, status and unread events from any previous run.
    pub fn start(&self) -> Result<Uuid> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(Error::Other("engine is already running".to_string()));
        }

        self.commands.reset();
        self.events.clear();
        self.shared.reset("Starting");

        let coordinator = ClaimCoordinator::new(
            Arc::clone(&self.factory),
            Arc::clone(&self.shared),
            Arc::clone(&self.events),
            Arc::clone(&self.log),
            self.pipeline.clone(),
            self.commands.clone(),
            self.config.clone(),
        );
        let run_id = coordinator.run_id();
        *worker = Some(tokio::spawn(coordinator.run()));
        info!(run_id = %run_id, "engine started");
        Ok(run_id)
    }

    /// Ask the worker to stop. Returns immediately; see [`Engine::join`].
    pub fn stop(&self) {
        info!("stop requested");
        self.commands.request_stop();
    }

    /// Skip the rest of the current sleep and poll now.
    pub fn refresh(&self) {
        self.commands.request_refresh();
    }

    /// Wait for the worker to exit. `None` if none was started.
    pub async fn join(&self) -> Option<EngineState> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        match handle.await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "engine worker panicked");
                self.shared
                    .set_status(Severity::Fatal, format!("Worker crashed: {e}"));
                self.shared.clear_slots();
                Some(self.shared.state())
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot()
    }

    /// Unread events, oldest first.
    pub fn poll_events(&self) -> Vec<Event> {
        self.events.drain()
    }

    /// Events lost because the observer fell behind.
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// Export files produced for the active claim in `category`.
    pub fn artifacts(&self, category: Category) -> Vec<Artifact> {
        self.shared
            .snapshot()
            .claim(category)
            .map(|c| c.artifacts.clone())
            .unwrap_or_default()
    }

    /// Release the claim in `category` and log it as completed.
    ///
    /// Returns the finished item, or `None` if the slot was empty. The slot is
    /// freed even if the log write fails; that failure only shows in the
    /// status line.
    pub async fn finish(&self, category: Category) -> Option<WorkItem> {
        let Some(claim) = self.shared.take(category) else {
            warn!(%category, "finish requested for empty slot");
            return None;
        };
        let mut item = claim.item;
        item.finished_at = Some(Local::now());

        let entry = LogEntry::finished(&item, &self.config.identity, &self.config.finished_status);
        match self.log.append_async(entry).await {
            Ok(()) => {
                info!(case_id = %item.display_id, %category, "claim finished");
                self.shared.set_status(
                    Severity::Info,
                    format!("Finished {} for {category}", item.display_id),
                );
            }
            Err(e) => {
                warn!(case_id = %item.display_id, error = %e, "finish not logged");
                self.shared.set_status(
                    Severity::Warning,
                    format!("Finished {} but the log write failed: {e}", item.display_id),
                );
            }
        }
        Some(item)
    }

    pub fn daily_report(&self, date: NaiveDate) -> Result<DailyReport> {
        let entries = self.log.get_all()?;
        Ok(activity::daily_report(&entries, date, &self.config.identity))
    }

    pub fn monthly_report(&self, month: u32, year: i32) -> Result<Vec<LeaderboardRow>> {
        if !(1..=12).contains(&month) {
            return Err(Error::Other(format!("month out of range: {month}")));
        }
        let entries = self.log.get_all()?;
        let month_rows = activity::in_month(&entries, month, year);
        Ok(activity::leaderboard(&month_rows, &self.config.identity))
    }
}
