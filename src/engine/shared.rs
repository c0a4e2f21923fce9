//! State shared between the worker and the observer.
//!
//! One mutex guards slots, status and lifecycle state together, so a claim on
//! the worker and a finish on the observer can never interleave. Critical
//! sections never await.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::model::{Artifact, Category, EngineState, WorkItem};

/// Severity of the current status line. Ordered mildest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Fatal,
}

/// An occupied category slot.
#[derive(Debug, Clone, Serialize)]
pub struct Claim {
    pub item: WorkItem,
    /// Export files from the extraction run, empty until it finishes.
    pub artifacts: Vec<Artifact>,
}

/// Point-in-time copy of the shared state for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub state: EngineState,
    pub status: String,
    pub severity: Severity,
    pub slots: BTreeMap<Category, Option<Claim>>,
}

impl Snapshot {
    pub fn claim(&self, category: Category) -> Option<&Claim> {
        self.slots.get(&category).and_then(Option::as_ref)
    }

    pub fn occupied(&self) -> usize {
        self.slots.values().filter(|s| s.is_some()).count()
    }
}

struct Inner {
    state: EngineState,
    status: String,
    severity: Severity,
    slots: BTreeMap<Category, Option<Claim>>,
}

pub struct SharedState {
    inner: Mutex<Inner>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: EngineState::Idle,
                status: "Idle".to_string(),
                severity: Severity::Info,
                slots: empty_slots(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Empty every slot and clear the status, ready for a new run.
    pub fn reset(&self, status: &str) {
        let mut inner = self.lock();
        inner.slots = empty_slots();
        inner.status = status.to_string();
        inner.severity = Severity::Info;
    }

    pub fn state(&self) -> EngineState {
        self.lock().state
    }

    /// Move to `to` if the lifecycle allows it. Returns the previous state on
    /// success.
    pub fn transition(&self, to: EngineState) -> Option<EngineState> {
        let mut inner = self.lock();
        let from = inner.state;
        if from == to || !from.can_transition_to(to) {
            return None;
        }
        inner.state = to;
        Some(from)
    }

    /// Replace the status line.
    ///
    /// Once a fatal status is set, milder ones are ignored until [`reset`].
    ///
    /// [`reset`]: SharedState::reset
    pub fn set_status(&self, severity: Severity, message: impl Into<String>) -> bool {
        let mut inner = self.lock();
        if inner.severity == Severity::Fatal && severity < Severity::Fatal {
            return false;
        }
        inner.status = message.into();
        inner.severity = severity;
        true
    }

    pub fn status(&self) -> (Severity, String) {
        let inner = self.lock();
        (inner.severity, inner.status.clone())
    }

    pub fn is_free(&self, category: Category) -> bool {
        matches!(self.lock().slots.get(&category), Some(None))
    }

    pub fn all_occupied(&self) -> bool {
        self.lock().slots.values().all(Option::is_some)
    }

    /// Fill an empty slot. Returns false, leaving the slot alone, if it is
    /// already taken.
    pub fn occupy(&self, category: Category, item: WorkItem) -> bool {
        let mut inner = self.lock();
        match inner.slots.get_mut(&category) {
            Some(slot @ None) => {
                *slot = Some(Claim {
                    item,
                    artifacts: Vec::new(),
                });
                true
            }
            _ => false,
        }
    }

    /// Attach export files to the claim for `display_id`, if it still holds
    /// the slot.
    pub fn attach_artifacts(&self, category: Category, display_id: &str, artifacts: Vec<Artifact>) -> bool {
        let mut inner = self.lock();
        match inner.slots.get_mut(&category) {
            Some(Some(claim)) if claim.item.display_id == display_id => {
                claim.artifacts = artifacts;
                true
            }
            _ => false,
        }
    }

    /// Empty one slot, returning what it held.
    pub fn take(&self, category: Category) -> Option<Claim> {
        self.lock().slots.get_mut(&category).and_then(Option::take)
    }

    /// Empty every slot.
    pub fn clear_slots(&self) -> Vec<Claim> {
        let mut inner = self.lock();
        inner.slots.values_mut().filter_map(Option::take).collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            state: inner.state,
            status: inner.status.clone(),
            severity: inner.severity,
            slots: inner.slots.clone(),
        }
    }
}

fn empty_slots() -> BTreeMap<Category, Option<Claim>> {
    Category::ALL.into_iter().map(|c| (c, None)).collect()
}
