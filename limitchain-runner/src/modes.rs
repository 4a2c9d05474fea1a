//! Task-less run modes: recent window and single-day update.

use chrono::{Days, NaiveDate};
use std::sync::atomic::AtomicBool;
use thiserror::Error;
use tracing::info;

use limitchain_core::store::StoreError;

use crate::context::{RunContext, UniverseError};
use crate::pipeline::{PipelineReport, StreakScope};
use crate::summary::{daily_summary, DailySummary};

#[derive(Debug, Error)]
pub enum ModeError {
    #[error(transparent)]
    Universe(#[from] UniverseError),

    #[error("storage: {0}")]
    Store(#[from] StoreError),

    #[error("a window of {days} days before {end} is out of the calendar range")]
    WindowOutOfRange { days: u32, end: NaiveDate },
}

#[derive(Debug, Clone)]
pub struct ModeReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub pipeline: PipelineReport,
    /// Summary of `end` as stored after the run.
    pub summary: DailySummary,
}

/// Ingest `[today - days, today]` through the batch loop.
///
/// Streaks are folded over the fetched window only, so the first sessions of
/// the window start from zero.
pub fn run_recent(
    ctx: &RunContext<'_>,
    days: u32,
    today: NaiveDate,
    cancel: Option<&AtomicBool>,
) -> Result<ModeReport, ModeError> {
    let start = today
        .checked_sub_days(Days::new(u64::from(days)))
        .ok_or(ModeError::WindowOutOfRange { days, end: today })?;
    info!(%start, end = %today, "recent-window run");

    let instruments = ctx.refresh_universe()?;
    let mut governor = ctx.governor();
    let pipeline = ctx
        .pipeline()
        .run(&instruments, start, today, &mut governor, cancel);

    let summary = daily_summary(ctx.store, today)?;
    Ok(ModeReport {
        start,
        end: today,
        pipeline,
        summary,
    })
}

/// Fetch one session for every instrument, then replay each instrument's
/// stored history so the day's streak height carries over from prior runs.
pub fn run_daily(
    ctx: &RunContext<'_>,
    date: NaiveDate,
    cancel: Option<&AtomicBool>,
) -> Result<ModeReport, ModeError> {
    info!(%date, "single-day update");

    let instruments = ctx.refresh_universe()?;
    let mut governor = ctx.governor();
    let pipeline = ctx
        .pipeline()
        .with_scope(StreakScope::StoredHistory { target: date })
        .run(&instruments, date, date, &mut governor, cancel);

    let summary = daily_summary(ctx.store, date)?;
    Ok(ModeReport {
        start: date,
        end: date,
        pipeline,
        summary,
    })
}
