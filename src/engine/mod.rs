//! Claim engine: worker loop, shared state, and the observer handle.

pub mod command;
pub mod coordinator;
pub mod handle;
pub mod shared;

pub use command::{CommandChannel, Wake};
pub use coordinator::{ClaimCoordinator, CycleOutcome};
pub use handle::Engine;
pub use shared::{Claim, Severity, SharedState, Snapshot};
