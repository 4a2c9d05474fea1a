//! LimitChain Core — domain types, limit classifier, streak engine, providers, storage.
//!
//! This crate contains the parts with real invariants:
//! - Domain types (instruments, bars, streak records, backfill tasks)
//! - Pure limit-up / one-word / fried-board predicates
//! - The per-instrument streak fold
//! - Data providers behind a per-run call governor
//! - Idempotent SQLite persistence keyed on (date, code)

pub mod data;
pub mod domain;
pub mod limit;
pub mod store;
pub mod streak;
