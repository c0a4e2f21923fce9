//! Claim coordinator: the worker loop.
//!
//! Drives one session through poll cycles: discover rows, claim at most one
//! case per cycle into a free category slot, log colleagues' progress, sleep
//! out the rest of the cycle budget. Fatal session errors end the run; every
//! other failure is confined to its row or its cycle.

use std::sync::Arc;

use chrono::Local;
use opentelemetry::KeyValue;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use super::command::{CommandChannel, Wake};
use super::shared::{Severity, SharedState};
use crate::activity::{ActivityLog, LogEntry, Observation};
use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::event::{EventChannel, EventKind};
use crate::extract::ExtractionPipeline;
use crate::model::{Category, EngineState, NOT_SPECIFIED, WorkItem, is_placeholder};
use crate::retry::retry_until;
use crate::session::{Field, RowHandle, SessionFactory, TaskBoardSession};
use crate::telemetry::cycle::{record_outcome, record_state_transition, start_cycle_span};
use crate::telemetry::metrics;

/// How one poll cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    Claimed(Category),
    NoClaimable,
    AllSlotsFull,
    /// Something failed but the session is still usable.
    Recoverable(String),
    /// A stop request arrived mid-scan.
    Interrupted,
    /// The session is gone.
    Fatal(Error),
}

impl CycleOutcome {
    fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Claimed(_) => "claim",
            CycleOutcome::NoClaimable => "no_claimable",
            CycleOutcome::AllSlotsFull => "all_slots_full",
            CycleOutcome::Recoverable(_) => "recoverable_error",
            CycleOutcome::Interrupted => "interrupted",
            CycleOutcome::Fatal(_) => "fatal_error",
        }
    }
}

/// The four columns read from every row during a scan.
#[derive(Debug, Clone)]
struct RowSummary {
    display_id: String,
    country: String,
    status: String,
    owner: String,
}

/// Everything the worker needs, cloned out of the engine handle per run.
pub struct ClaimCoordinator {
    factory: Arc<dyn SessionFactory>,
    shared: Arc<SharedState>,
    events: Arc<EventChannel>,
    log: Arc<ActivityLog>,
    pipeline: Option<Arc<ExtractionPipeline>>,
    commands: CommandChannel,
    config: CoordinatorConfig,
    run_id: Uuid,
    span: tracing::Span,
}

impl ClaimCoordinator {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        shared: Arc<SharedState>,
        events: Arc<EventChannel>,
        log: Arc<ActivityLog>,
        pipeline: Option<Arc<ExtractionPipeline>>,
        commands: CommandChannel,
        config: CoordinatorConfig,
    ) -> Self {
        let run_id = Uuid::new_v4();
        Self {
            factory,
            shared,
            events,
            log,
            pipeline,
            commands,
            config,
            run_id,
            span: tracing::info_span!("claimer.run", "run.id" = %run_id),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn enter(&self, to: EngineState) {
        if let Some(from) = self.shared.transition(to) {
            record_state_transition(&self.span, &from.to_string(), &to.to_string());
        }
    }

    fn fatal(&self, e: &Error) {
        error!(error = %e, kind = e.kind(), "fatal engine error");
        metrics::errors().add(1, &[KeyValue::new("kind", e.kind())]);
        self.shared
            .set_status(Severity::Fatal, format!("Stopped: {e}"));
        self.events.emit(EventKind::FatalError {
            reason: e.to_string(),
        });
    }

    /// Run until stopped or the session dies. Returns the final state.
    pub async fn run(self) -> EngineState {
        let span = self.span.clone();
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> EngineState {
        self.enter(EngineState::Initializing);
        self.shared
            .set_status(Severity::Info, "Opening board session");
        info!("claimer starting");

        let session = match self.factory.open().await {
            Ok(session) => session,
            Err(e) => {
                self.fatal(&e);
                return self.finish_run(None).await;
            }
        };

        if self.commands.stop_requested() {
            return self.finish_run(Some(session)).await;
        }

        match session.verify_ready().await {
            Ok(true) => {}
            Ok(false) => {
                self.fatal(&Error::SessionInit(
                    "board never finished loading (snapshot saved)".to_string(),
                ));
                return self.finish_run(Some(session)).await;
            }
            Err(e) => {
                let e = match e {
                    Error::SessionDead(m) => Error::SessionInit(m),
                    other => other,
                };
                self.fatal(&e);
                return self.finish_run(Some(session)).await;
            }
        }

        self.enter(EngineState::Monitoring);
        self.shared
            .set_status(Severity::Info, "Monitoring board");
        info!("board ready, monitoring");

        let mut cycle: u64 = 0;
        while !self.commands.stop_requested() {
            cycle += 1;
            let started = Instant::now();
            let cycle_span = start_cycle_span(&self.run_id, cycle);

            let outcome = self
                .run_cycle(session.as_ref())
                .instrument(cycle_span.clone())
                .await;

            let elapsed = started.elapsed();
            record_outcome(&cycle_span, outcome.label());
            metrics::cycles().add(1, &[KeyValue::new("outcome", outcome.label())]);
            metrics::cycle_duration_ms().record(elapsed.as_secs_f64() * 1000.0, &[]);

            match outcome {
                CycleOutcome::Fatal(e) => {
                    self.fatal(&e);
                    break;
                }
                CycleOutcome::Interrupted => break,
                _ => {}
            }

            let pause = self
                .config
                .cycle_budget
                .saturating_sub(elapsed)
                .max(self.config.min_sleep);
            debug!(cycle, pause_ms = pause.as_millis() as u64, "cycle done");
            if self.commands.sleep(pause, self.config.stop_slice).await == Wake::Stop {
                break;
            }
        }

        self.finish_run(Some(session)).await
    }

    /// Release the session and empty every slot.
    async fn finish_run(&self, session: Option<Box<dyn TaskBoardSession>>) -> EngineState {
        // A failed start goes straight to Stopped.
        let failed_start = self.shared.state() == EngineState::Initializing
            && self.shared.status().0 == Severity::Fatal;
        if !failed_start {
            self.enter(EngineState::Stopping);
        }
        if let Some(session) = session
            && let Err(e) = session.close().await
        {
            warn!(error = %e, "closing session failed");
        }
        let dropped = self.shared.clear_slots();
        if !dropped.is_empty() {
            info!(claims = dropped.len(), "cleared active claims on shutdown");
        }
        self.enter(EngineState::Stopped);
        self.shared.set_status(Severity::Info, "Stopped");
        self.events.emit(EventKind::Stopped);
        info!("claimer stopped");
        self.shared.state()
    }

    /// One poll cycle against a ready session.
    pub async fn run_cycle(&self, session: &dyn TaskBoardSession) -> CycleOutcome {
        let stamp = Local::now().format("%H:%M:%S").to_string();

        if self.shared.all_occupied() {
            self.events.emit(EventKind::AllSlotsFull);
            self.shared
                .set_status(Severity::Info, format!("All slots full, waiting ({stamp})"));
            return CycleOutcome::AllSlotsFull;
        }

        let rows = match session.discover_rows().await {
            Ok(rows) => rows,
            Err(e) if e.is_fatal() => return CycleOutcome::Fatal(e),
            Err(e) => {
                warn!(error = %e, "row discovery failed");
                metrics::errors().add(1, &[KeyValue::new("kind", e.kind())]);
                return self.recoverable(format!("row discovery failed: {e}"));
            }
        };
        if rows.is_empty() {
            self.events.emit(EventKind::NoClaimable);
            self.shared
                .set_status(Severity::Info, format!("No rows on board ({stamp})"));
            return CycleOutcome::NoClaimable;
        }
        info!(rows = rows.len(), "scanning rows");

        let mut last_failure = None;
        for row in &rows {
            if self.commands.stop_requested() {
                return CycleOutcome::Interrupted;
            }
            match self.scan_row(session, row).await {
                Ok(Some(category)) => return CycleOutcome::Claimed(category),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return CycleOutcome::Fatal(e),
                Err(e) => last_failure = Some(e.to_string()),
            }
        }

        match last_failure {
            Some(reason) => self.recoverable(reason),
            None => {
                self.events.emit(EventKind::NoClaimable);
                self.shared
                    .set_status(Severity::Info, format!("Monitoring, nothing to claim ({stamp})"));
                CycleOutcome::NoClaimable
            }
        }
    }

    fn recoverable(&self, reason: String) -> CycleOutcome {
        self.shared.set_status(Severity::Warning, reason.clone());
        self.events.emit(EventKind::RecoverableError {
            reason: reason.clone(),
        });
        CycleOutcome::Recoverable(reason)
    }

    /// Process one row. `Ok(Some(_))` means it was claimed and the scan ends.
    ///
    /// Row-level problems are absorbed here; an `Err` is either fatal or a
    /// failed claim attempt.
    async fn scan_row(&self, session: &dyn TaskBoardSession, row: &RowHandle) -> Result<Option<Category>> {
        let visible = retry_until(&self.config.row_visibility, move |_| session.ensure_visible(row)).await?;
        if !visible {
            debug!(row = row.index, "row not visible, skipping");
            metrics::rows_skipped().add(1, &[KeyValue::new("reason", "not_visible")]);
            return Ok(None);
        }

        let summary = match self.summarize(session, row).await {
            Ok(s) => s,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(row = row.index, error = %e, "row unreadable, skipping");
                let reason = if e.is_row_level() { e.kind() } else { "unreadable" };
                metrics::rows_skipped().add(1, &[KeyValue::new("reason", reason)]);
                return Ok(None);
            }
        };
        info!(
            row = row.index + 1,
            case_id = %summary.display_id,
            country = %summary.country,
            status = %summary.status,
            owner = %summary.owner,
            "row scanned"
        );

        if let Some(category) = self.claimable(&summary) {
            return self.attempt_claim(session, row, category, &summary).await;
        }

        if self.is_colleague_progress(&summary) {
            self.observe(session, row, summary).await?;
        }
        Ok(None)
    }

    async fn summarize(&self, session: &dyn TaskBoardSession, row: &RowHandle) -> Result<RowSummary> {
        let task_id = session.extract_field(row, Field::TaskId).await?;
        let display_id = if is_placeholder(&task_id) {
            match session.row_dom_id(row).await? {
                Some(id) => id,
                None => format!("Row_Index_{}_NoID", row.index + 1),
            }
        } else {
            task_id
        };
        Ok(RowSummary {
            display_id,
            status: session.extract_field(row, Field::Status).await?,
            country: session.extract_field(row, Field::Country).await?,
            owner: session.extract_field(row, Field::Owner).await?,
        })
    }

    fn claimable(&self, row: &RowSummary) -> Option<Category> {
        let category = Category::from_label(&row.country)?;
        (row.status.trim() == self.config.claimable_status
            && is_placeholder(&row.owner)
            && self.shared.is_free(category))
        .then_some(category)
    }

    fn is_colleague_progress(&self, row: &RowSummary) -> bool {
        if is_placeholder(&row.owner)
            || row
                .owner
                .to_lowercase()
                .contains(&self.config.identity.to_lowercase())
        {
            return false;
        }
        let status = row.status.trim().to_lowercase();
        self.config.observed_statuses.iter().any(|s| *s == status)
    }

    /// Log a colleague's row. Log failures are reported, never propagated.
    async fn observe(&self, session: &dyn TaskBoardSession, row: &RowHandle, summary: RowSummary) -> Result<()> {
        let extra = async {
            Ok::<_, Error>((
                session.extract_field(row, Field::AccountName).await?,
                session.extract_field(row, Field::CaseTitle).await?,
                session.extract_field(row, Field::MenuLink).await?,
            ))
        };
        let (account, title, link) = match extra.await {
            Ok(v) => v,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(case_id = %summary.display_id, error = %e, "observation details unreadable");
                (
                    NOT_SPECIFIED.to_string(),
                    NOT_SPECIFIED.to_string(),
                    NOT_SPECIFIED.to_string(),
                )
            }
        };
        let status = summary.status.trim().to_lowercase();
        let entry = LogEntry::observed(Observation {
            case_id: summary.display_id,
            country: summary.country,
            owner: summary.owner,
            status: summary.status,
            account,
            title,
            link,
            at: Local::now(),
        });
        let case_id = entry.case_id.clone();
        match self.log.append_async(entry).await {
            Ok(()) => {
                metrics::observations().add(1, &[KeyValue::new("status", status)]);
            }
            Err(e) => {
                warn!(%case_id, error = %e, "observation not logged");
                metrics::errors().add(1, &[KeyValue::new("kind", e.kind())]);
            }
        }
        Ok(())
    }

    /// Read the full row, then claim it.
    async fn snapshot(
        &self,
        session: &dyn TaskBoardSession,
        row: &RowHandle,
        category: Category,
        summary: &RowSummary,
    ) -> Result<WorkItem> {
        let menu_link = session.extract_field(row, Field::MenuLink).await?;
        let photos_link = session.extract_field(row, Field::PhotosLink).await?;
        let links = [menu_link, photos_link]
            .into_iter()
            .filter(|l| !is_placeholder(l))
            .collect();
        Ok(WorkItem {
            category,
            display_id: summary.display_id.clone(),
            status: summary.status.clone(),
            owner: summary.owner.clone(),
            account: session.extract_field(row, Field::AccountName).await?,
            title: session.extract_field(row, Field::CaseTitle).await?,
            links,
            instructions: session.extract_field(row, Field::Instructions).await?,
            request_sent: session.extract_field(row, Field::RequestSent).await?,
            created_by: session.extract_field(row, Field::CreatedBy).await?,
            observed_at: Local::now(),
            claimed_at: None,
            finished_at: None,
        })
    }

    async fn attempt_claim(
        &self,
        session: &dyn TaskBoardSession,
        row: &RowHandle,
        category: Category,
        summary: &RowSummary,
    ) -> Result<Option<Category>> {
        info!(case_id = %summary.display_id, %category, "claiming case");

        let attempt = async {
            let item = self.snapshot(session, row, category, summary).await?;
            session.claim(row).await?;
            Ok::<_, Error>(item)
        };
        let mut item = match attempt.await {
            Ok(item) => item,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(case_id = %summary.display_id, error = %e, "claim attempt failed");
                metrics::errors().add(1, &[KeyValue::new("kind", e.kind())]);
                self.recover(session).await?;
                return Err(Error::ClaimAttempt(format!("{}: {e}", summary.display_id)));
            }
        };

        item.claimed_at = Some(Local::now());
        item.owner = self.config.identity.clone();
        item.status = self.config.claimed_status.clone();
        if !self.shared.occupy(category, item.clone()) {
            warn!(case_id = %item.display_id, %category, "slot filled concurrently, claim not tracked");
        }
        metrics::claims().add(1, &[KeyValue::new("category", category.label())]);
        info!(case_id = %item.display_id, %category, "case claimed");

        let entry = LogEntry::claimed(&item, &self.config.identity, &self.config.claimed_status);
        if let Err(e) = self.log.append_async(entry).await {
            warn!(case_id = %item.display_id, error = %e, "claim not logged");
            metrics::errors().add(1, &[KeyValue::new("kind", e.kind())]);
        }

        self.extract(&item).await;

        self.shared.set_status(
            Severity::Info,
            format!("Claimed {} for {category}", item.display_id),
        );
        self.events.emit(EventKind::ClaimSuccess {
            category,
            item: Box::new(item),
        });
        self.recover(session).await?;
        Ok(Some(category))
    }

    /// Run the extraction pipeline for a fresh claim. Never fails the claim.
    async fn extract(&self, item: &WorkItem) {
        let Some(pipeline) = &self.pipeline else {
            return;
        };
        match pipeline.run(item).await {
            Ok(Some(output)) if !output.is_empty() => {
                let artifacts = output.artifacts();
                info!(case_id = %item.display_id, files = artifacts.len(), "export files ready");
                self.shared
                    .attach_artifacts(item.category, &item.display_id, artifacts);
            }
            Ok(_) => debug!(case_id = %item.display_id, "no export files for claim"),
            Err(e) => {
                warn!(case_id = %item.display_id, error = %e, "extraction failed, claim kept");
                metrics::errors().add(1, &[KeyValue::new("kind", e.kind())]);
            }
        }
    }

    /// Return to the board's home view. Only a dead session is an error.
    async fn recover(&self, session: &dyn TaskBoardSession) -> Result<()> {
        match session.navigate_home().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "navigating home failed");
                Ok(())
            }
        }
    }
}
