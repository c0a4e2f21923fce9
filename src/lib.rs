//! # case-claimer
//!
//! Background claimer for a remote task board.
//!
//! Polls the board through a browser automation session, claims at most one
//! case per work category, runs an extraction pipeline on each claim, and
//! keeps an append-only CSV activity log for reporting.

pub mod activity;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod extract;
pub mod model;
pub mod retry;
pub mod session;
pub mod telemetry;
