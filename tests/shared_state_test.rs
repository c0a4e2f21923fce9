//! Shared state, events, commands and retry policy.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use case_claimer::engine::{CommandChannel, Severity, SharedState, Wake};
use case_claimer::error::Error;
use case_claimer::event::{EventChannel, EventKind};
use case_claimer::model::{Category, EngineState, WorkItem, is_placeholder};
use case_claimer::retry::{RetryPolicy, retry_until};
use chrono::Local;

fn item(category: Category, id: &str) -> WorkItem {
    WorkItem {
        category,
        display_id: id.to_string(),
        status: "In Progress".to_string(),
        owner: "BOT_CLAIMED".to_string(),
        account: String::new(),
        title: String::new(),
        links: Vec::new(),
        instructions: String::new(),
        request_sent: String::new(),
        created_by: String::new(),
        observed_at: Local::now(),
        claimed_at: None,
        finished_at: None,
    }
}

// ---------------------------------------------------------------------------
// Slots and status
// ---------------------------------------------------------------------------

#[test]
fn one_claim_per_category() {
    let shared = SharedState::new();
    assert!(shared.is_free(Category::Portugal));
    assert!(shared.occupy(Category::Portugal, item(Category::Portugal, "A")));
    assert!(!shared.occupy(Category::Portugal, item(Category::Portugal, "B")));
    assert_eq!(
        shared.snapshot().claim(Category::Portugal).unwrap().item.display_id,
        "A"
    );
    assert!(!shared.all_occupied());

    assert!(shared.occupy(Category::Ghana, item(Category::Ghana, "C")));
    assert!(shared.all_occupied());

    assert_eq!(shared.take(Category::Portugal).unwrap().item.display_id, "A");
    assert!(shared.take(Category::Portugal).is_none());
    assert_eq!(shared.clear_slots().len(), 1);
    assert_eq!(shared.snapshot().occupied(), 0);
}

#[test]
fn artifacts_attach_only_to_matching_claim() {
    let shared = SharedState::new();
    shared.occupy(Category::Ghana, item(Category::Ghana, "G-1"));
    let files = vec![case_claimer::model::Artifact {
        filename: "menu.csv".to_string(),
        bytes: b"ID".to_vec(),
    }];
    assert!(!shared.attach_artifacts(Category::Ghana, "G-2", files.clone()));
    assert!(!shared.attach_artifacts(Category::Portugal, "G-1", files.clone()));
    assert!(shared.attach_artifacts(Category::Ghana, "G-1", files));
    assert_eq!(shared.snapshot().claim(Category::Ghana).unwrap().artifacts.len(), 1);
}

#[test]
fn fatal_status_latches_until_reset() {
    let shared = SharedState::new();
    assert!(shared.set_status(Severity::Warning, "row skipped"));
    assert!(shared.set_status(Severity::Fatal, "session dead"));
    assert!(!shared.set_status(Severity::Info, "Stopped"));
    assert_eq!(shared.status(), (Severity::Fatal, "session dead".to_string()));

    shared.reset("Starting");
    assert_eq!(shared.status(), (Severity::Info, "Starting".to_string()));
}

#[test]
fn lifecycle_transitions() {
    let shared = SharedState::new();
    assert_eq!(shared.transition(EngineState::Monitoring), None);
    assert_eq!(shared.transition(EngineState::Initializing), Some(EngineState::Idle));
    assert_eq!(shared.transition(EngineState::Monitoring), Some(EngineState::Initializing));
    assert_eq!(shared.transition(EngineState::Stopped), None);
    assert_eq!(shared.transition(EngineState::Stopping), Some(EngineState::Monitoring));
    assert_eq!(shared.transition(EngineState::Stopped), Some(EngineState::Stopping));
    assert!(!shared.state().is_active());
    assert!(EngineState::Stopped.can_transition_to(EngineState::Initializing));
}

#[test]
fn category_labels() {
    assert_eq!(Category::from_label(" Portugal "), Some(Category::Portugal));
    assert_eq!(Category::from_label("portugal"), None);
    assert_eq!("GH".parse::<Category>(), Ok(Category::Ghana));
    assert!("spain".parse::<Category>().is_err());
    assert!(is_placeholder("n/a"));
    assert!(is_placeholder("Not Specified"));
    assert!(!is_placeholder("alice@example.com"));
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[test]
fn event_channel_drops_oldest_when_full() {
    let events = EventChannel::new(2);
    events.emit(EventKind::NoClaimable);
    events.emit(EventKind::AllSlotsFull);
    events.emit(EventKind::Stopped);

    assert_eq!(events.dropped(), 1);
    let drained = events.drain();
    let seqs: Vec<u64> = drained.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![2, 3]);
    assert_eq!(drained[1].kind, EventKind::Stopped);
    assert!(events.is_empty());
}

#[test]
fn event_serializes_with_type_tag() {
    let events = EventChannel::new(4);
    let event = events.emit(EventKind::RecoverableError {
        reason: "row stale".to_string(),
    });
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["kind"]["type"], "recoverable_error");
    assert_eq!(json["kind"]["reason"], "row stale");
}

// ---------------------------------------------------------------------------
// Commands and retry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn sleep_wakes_on_stop_and_refresh() {
    let commands = CommandChannel::new();
    assert_eq!(
        commands.sleep(Duration::from_millis(30), Duration::from_millis(10)).await,
        Wake::Elapsed
    );

    commands.request_refresh();
    assert_eq!(
        commands.sleep(Duration::from_secs(60), Duration::from_millis(10)).await,
        Wake::Refresh
    );

    let stopper = commands.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        stopper.request_stop();
    });
    let started = tokio::time::Instant::now();
    assert_eq!(
        commands.sleep(Duration::from_secs(60), Duration::from_millis(10)).await,
        Wake::Stop
    );
    assert!(started.elapsed() < Duration::from_millis(50));

    commands.reset();
    assert!(!commands.stop_requested());
}

#[tokio::test(start_paused = true)]
async fn retry_gives_up_after_max_attempts() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::attempts(3, Duration::from_millis(100), 2.0);
    let held = retry_until(&policy, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(false) }
    })
    .await
    .unwrap();
    assert!(!held);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(policy.delay_after(1), Duration::from_millis(100));
    assert_eq!(policy.delay_after(2), Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn retry_treats_row_errors_as_misses_and_stops_on_fatal() {
    let policy = RetryPolicy::attempts(4, Duration::from_millis(10), 1.0);
    let held = retry_until(&policy, |attempt| async move {
        match attempt {
            0 => Err(Error::RowStale("gone".to_string())),
            _ => Ok(true),
        }
    })
    .await
    .unwrap();
    assert!(held);

    let calls = AtomicU32::new(0);
    let err = retry_until(&policy, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(Error::SessionDead("disconnected".to_string())) }
    })
    .await
    .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn long_backoff_is_capped_at_max_delay() {
    let policy = RetryPolicy::attempts(100, Duration::from_millis(500), 2.0);
    assert_eq!(policy.delay_after(70), policy.max_delay);
    assert_eq!(policy.delay_after(u32::MAX), policy.max_delay);

    let calls = AtomicU32::new(0);
    let held = retry_until(&policy, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(false) }
    })
    .await
    .unwrap();
    assert!(!held);
    assert_eq!(calls.load(Ordering::SeqCst), 100);
}

#[tokio::test(start_paused = true)]
async fn poll_policy_respects_time_budget() {
    let policy = RetryPolicy::poll(Duration::from_millis(500), Duration::from_secs(2));
    let started = tokio::time::Instant::now();
    let held = retry_until(&policy, |_| async { Ok(false) }).await.unwrap();
    assert!(!held);
    assert!(started.elapsed() <= Duration::from_secs(2));
}
