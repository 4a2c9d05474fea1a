//! Batched ingestion — fetch through the governor, persist, derive streaks.
//!
//! Batches run strictly in order, one at a time. A failed batch is recorded
//! and the loop moves on; a rate-limit or interrupt halts the loop after the
//! current batch's rows are persisted. Every batch commits independently, so
//! anything persisted before a halt survives it.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, info_span, warn};

use limitchain_core::data::{DataProvider, GovernedFetch, InstrumentOutcome, RateGovernor};
use limitchain_core::domain::{Bar, Instrument, StreakRecord};
use limitchain_core::limit::LimitRules;
use limitchain_core::store::{Storage, StoreError, WriteReport};
use limitchain_core::streak::{compute_streaks, group_by_code};

use crate::progress::IngestProgress;

/// Which bars the streak engine folds for each fetched instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakScope {
    /// Fold only the bars fetched in this batch.
    FetchedRange,
    /// Fold the instrument's full stored history up to `target` and keep only
    /// the record for `target`.
    StoredHistory { target: NaiveDate },
}

/// Why the batch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    Completed,
    RateLimited,
    Interrupted,
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Halt::Completed => "completed",
            Halt::RateLimited => "rate limited",
            Halt::Interrupted => "interrupted",
        })
    }
}

/// Counters for a batch whose rows were persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStats {
    pub index: usize,
    pub instruments: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub bars: WriteReport,
    pub streaks: WriteReport,
    pub limit_ups: usize,
    /// The batch was cut short by a halt.
    pub partial: bool,
    pub outcomes: Vec<InstrumentOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchFailure {
    /// Every instrument was skipped.
    NoRows { skipped: usize },
    /// An error that would repeat for every call, such as a rejected token.
    Provider(String),
    Storage(String),
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchFailure::NoRows { skipped } => write!(f, "no rows ({skipped} instruments skipped)"),
            BatchFailure::Provider(e) => write!(f, "provider: {e}"),
            BatchFailure::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Succeeded(BatchStats),
    Failed {
        index: usize,
        reason: BatchFailure,
        outcomes: Vec<InstrumentOutcome>,
    },
}

impl BatchOutcome {
    pub fn index(&self) -> usize {
        match self {
            BatchOutcome::Succeeded(stats) => stats.index,
            BatchOutcome::Failed { index, .. } => *index,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::Succeeded(_))
    }
}

/// Result of one pass of the batch loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub batches_total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub halt: Halt,
    /// Cumulative governor calls at the end of the loop.
    pub calls_made: u32,
    pub outcomes: Vec<BatchOutcome>,
}

impl PipelineReport {
    pub fn batches_run(&self) -> usize {
        self.outcomes.len()
    }

    pub fn bars_inserted(&self) -> usize {
        self.success_stats().map(|s| s.bars.inserted).sum()
    }

    pub fn streaks_inserted(&self) -> usize {
        self.success_stats().map(|s| s.streaks.inserted).sum()
    }

    fn success_stats(&self) -> impl Iterator<Item = &BatchStats> {
        self.outcomes.iter().filter_map(|o| match o {
            BatchOutcome::Succeeded(stats) => Some(stats),
            BatchOutcome::Failed { .. } => None,
        })
    }
}

/// Sequential batch loop over a provider and a store.
pub struct IngestPipeline<'a> {
    provider: &'a dyn DataProvider,
    store: &'a dyn Storage,
    rules: &'a LimitRules,
    progress: &'a dyn IngestProgress,
    batch_size: usize,
    scope: StreakScope,
}

impl<'a> IngestPipeline<'a> {
    pub fn new(
        provider: &'a dyn DataProvider,
        store: &'a dyn Storage,
        rules: &'a LimitRules,
        progress: &'a dyn IngestProgress,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            store,
            rules,
            progress,
            batch_size: batch_size.max(1),
            scope: StreakScope::FetchedRange,
        }
    }

    pub fn with_scope(mut self, scope: StreakScope) -> Self {
        self.scope = scope;
        self
    }

    /// Run every batch over `[start, end]`.
    pub fn run(
        &self,
        instruments: &[Instrument],
        start: NaiveDate,
        end: NaiveDate,
        governor: &mut RateGovernor,
        cancel: Option<&AtomicBool>,
    ) -> PipelineReport {
        let batches: Vec<&[Instrument]> = instruments.chunks(self.batch_size).collect();
        let total = batches.len();
        let mut report = PipelineReport {
            batches_total: total,
            succeeded: 0,
            failed: 0,
            halt: Halt::Completed,
            calls_made: governor.calls_made(),
            outcomes: Vec::with_capacity(total),
        };
        info!(
            instruments = instruments.len(),
            batches = total,
            %start,
            %end,
            provider = self.provider.name(),
            "ingest started"
        );

        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                report.halt = Halt::Interrupted;
                break;
            }
            let _span = info_span!("batch", index, size = batch.len()).entered();
            self.progress.on_batch_start(index, total, batch.len());

            let codes: Vec<&str> = batch.iter().map(|i| i.code.as_str()).collect();
            let fetch = governor.fetch_batch(self.provider, &codes, start, end, cancel);
            let halted = if fetch.rate_limited {
                Some(Halt::RateLimited)
            } else if fetch.interrupted {
                Some(Halt::Interrupted)
            } else {
                None
            };

            // A halt before any row arrived leaves nothing to record for this batch.
            if halted.is_none() || !fetch.bars.is_empty() {
                let outcome = self.finish_batch(index, batch, fetch, halted.is_some());
                match &outcome {
                    BatchOutcome::Succeeded(stats) => {
                        report.succeeded += 1;
                        info!(
                            fetched = stats.fetched,
                            skipped = stats.skipped,
                            bars_inserted = stats.bars.inserted,
                            streaks_inserted = stats.streaks.inserted,
                            limit_ups = stats.limit_ups,
                            "batch persisted"
                        );
                    }
                    BatchOutcome::Failed { reason, .. } => {
                        report.failed += 1;
                        warn!(%reason, "batch failed");
                    }
                }
                self.progress.on_batch_complete(total, &outcome);
                report.outcomes.push(outcome);
            }

            report.calls_made = governor.calls_made();
            if let Some(halt) = halted {
                warn!(%halt, calls_made = report.calls_made, "ingest halted");
                report.halt = halt;
                break;
            }
        }

        info!(
            halt = %report.halt,
            succeeded = report.succeeded,
            failed = report.failed,
            calls_made = report.calls_made,
            "ingest finished"
        );
        self.progress.on_run_complete(&report);
        report
    }

    fn finish_batch(
        &self,
        index: usize,
        batch: &[Instrument],
        fetch: GovernedFetch,
        partial: bool,
    ) -> BatchOutcome {
        let fetched = fetch.fetched();
        let skipped = fetch.skipped();

        if let Some(fatal) = fetch.fatal() {
            // Rows fetched before the fatal call get bars and records like any other.
            let mut reason = BatchFailure::Provider(fatal.to_string());
            if !fetch.bars.is_empty() {
                if let Err(e) = self.persist(batch, &fetch.bars) {
                    warn!(error = %e, %fatal, "could not persist rows ahead of fatal error");
                    reason = BatchFailure::Storage(e.to_string());
                }
            }
            return BatchOutcome::Failed {
                index,
                reason,
                outcomes: fetch.outcomes,
            };
        }
        if fetch.bars.is_empty() {
            return BatchOutcome::Failed {
                index,
                reason: BatchFailure::NoRows { skipped },
                outcomes: fetch.outcomes,
            };
        }

        match self.persist(batch, &fetch.bars) {
            Ok((bars, streaks, limit_ups)) => BatchOutcome::Succeeded(BatchStats {
                index,
                instruments: batch.len(),
                fetched,
                skipped,
                bars,
                streaks,
                limit_ups,
                partial,
                outcomes: fetch.outcomes,
            }),
            Err(e) => BatchOutcome::Failed {
                index,
                reason: BatchFailure::Storage(e.to_string()),
                outcomes: fetch.outcomes,
            },
        }
    }

    /// Persist raw bars, then fold and persist streak records per instrument.
    fn persist(
        &self,
        batch: &[Instrument],
        bars: &[Bar],
    ) -> Result<(WriteReport, WriteReport, usize), StoreError> {
        let bar_report = self.store.insert_bars(bars)?;

        let by_code: HashMap<&str, &Instrument> =
            batch.iter().map(|i| (i.code.as_str(), i)).collect();
        let mut records: Vec<StreakRecord> = Vec::new();

        for (code, history) in group_by_code(bars) {
            let Some(instrument) = by_code.get(code.as_str()) else {
                warn!(code = %code, "provider returned rows for an instrument outside the batch");
                continue;
            };
            let rule = self.rules.rule_for(instrument);
            match self.scope {
                StreakScope::FetchedRange => records.extend(compute_streaks(&history, rule)),
                StreakScope::StoredHistory { target } => {
                    let full = self.store.bars_for_code(&code, None, Some(target))?;
                    records.extend(
                        compute_streaks(&full, rule)
                            .into_iter()
                            .filter(|r| r.date == target),
                    );
                }
            }
        }

        let limit_ups = records.iter().filter(|r| r.limit_flag).count();
        let streak_report = self.store.insert_streaks(&records)?;
        Ok((bar_report, streak_report, limit_ups))
    }
}
