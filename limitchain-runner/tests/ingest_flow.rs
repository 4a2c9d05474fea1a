//! End-to-end ingestion tests: scripted provider, static universe, in-memory SQLite.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use limitchain_core::data::{
    CsvProvider, DataError, DataProvider, DataSource, FetchResult, InstrumentOutcome,
    SkipReason, StaticUniverse, UniverseEntry,
};
use limitchain_core::domain::{Bar, TaskStatus};
use limitchain_core::limit::LimitRules;
use limitchain_core::store::{SqliteStore, Storage};
use limitchain_runner::{
    run_daily, run_recent, BackfillError, BackfillManager, BatchFailure, BatchOutcome, Halt,
    ModeError, ResumeOutcome, RunContext, SilentProgress, TrackerConfig,
};

// ── Fixtures ────────────────────────────────────────────────────────

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, day).unwrap()
}

fn bar(code: &str, day: u32, close: f64, prev_close: f64) -> Bar {
    Bar {
        date: d(day),
        code: code.into(),
        open: prev_close,
        high: close.max(prev_close),
        low: close.min(prev_close),
        close,
        prev_close,
        volume: 1_000.0,
        amount: close * 1_000.0,
    }
}

/// Consecutive 10% limit-up closes starting from a previous close of 10.
fn limit_series(code: &str, days: &[u32]) -> Vec<Bar> {
    let mut prev = 10.0;
    days.iter()
        .map(|&day| {
            let close = (prev * 1.1_f64 * 100.0).round() / 100.0;
            let b = bar(code, day, close, prev);
            prev = close;
            b
        })
        .collect()
}

fn flat_series(code: &str, days: &[u32]) -> Vec<Bar> {
    days.iter().map(|&day| bar(code, day, 10.0, 10.0)).collect()
}

#[derive(Clone, Copy)]
enum Fail {
    NotFound,
    Auth,
}

/// Provider that serves scripted bars and records every call.
#[derive(Default)]
struct ScriptedProvider {
    bars: HashMap<String, Vec<Bar>>,
    failures: HashMap<String, Fail>,
    calls: Mutex<Vec<String>>,
    /// Raise the flag once this many calls have been served.
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
}

impl ScriptedProvider {
    fn with_bars(mut self, bars: Vec<Bar>) -> Self {
        for b in bars {
            self.bars.entry(b.code.clone()).or_default().push(b);
        }
        self
    }

    fn failing(mut self, code: &str, fail: Fail) -> Self {
        self.failures.insert(code.to_string(), fail);
        self
    }

    fn cancelling_after(mut self, calls: usize, flag: Arc<AtomicBool>) -> Self {
        self.cancel_after = Some((calls, flag));
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl DataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(&self, code: &str, start: NaiveDate, end: NaiveDate) -> Result<FetchResult, DataError> {
        {
            let mut calls = self.calls.lock().unwrap();
            calls.push(code.to_string());
            if let Some((after, flag)) = &self.cancel_after {
                if calls.len() == *after {
                    flag.store(true, Ordering::SeqCst);
                }
            }
        }
        match self.failures.get(code) {
            Some(Fail::NotFound) => {
                return Err(DataError::SymbolNotFound {
                    code: code.to_string(),
                })
            }
            Some(Fail::Auth) => return Err(DataError::AuthenticationRequired("bad token".into())),
            None => {}
        }
        let bars = self
            .bars
            .get(code)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= start && b.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(FetchResult {
            code: code.to_string(),
            bars,
            source: DataSource::Synthetic,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn universe(codes: &[&str]) -> StaticUniverse {
    let entries = codes
        .iter()
        .map(|c| UniverseEntry {
            code: c.to_string(),
            name: format!("Name {c}"),
        })
        .collect();
    StaticUniverse::new(entries, LimitRules::default())
}

fn config(batch_size: usize, max_calls: u32) -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.ingest.batch_size = batch_size;
    config.rate_limit.max_calls = max_calls;
    config.rate_limit.pause_ms = 0;
    config
}

fn context<'a>(
    config: &'a TrackerConfig,
    store: &'a SqliteStore,
    provider: &'a dyn DataProvider,
    universe: &'a StaticUniverse,
) -> RunContext<'a> {
    RunContext {
        config,
        store,
        provider,
        universe,
        progress: &SilentProgress,
    }
}

fn heights(store: &SqliteStore, code: &str) -> Vec<u32> {
    store
        .streaks_for_code(code, None, None)
        .unwrap()
        .iter()
        .map(|r| r.streak_height)
        .collect()
}

// ── Backfill ────────────────────────────────────────────────────────

#[test]
fn backfill_completes_and_stores_streaks() {
    let store = SqliteStore::open_in_memory().unwrap();
    let provider = ScriptedProvider::default()
        .with_bars(limit_series("600001", &[3, 4, 5]))
        .with_bars(flat_series("600002", &[3, 4, 5]))
        .with_bars(flat_series("000003", &[3, 4, 5]));
    let universe = universe(&["600001", "600002", "000003"]);
    let config = config(2, 195);

    let manager = BackfillManager::new(context(&config, &store, &provider, &universe));
    let report = manager.start(d(3), d(5), None).unwrap();

    assert_eq!(report.status, TaskStatus::Completed);
    assert_eq!(report.pipeline.batches_total, 2);
    assert_eq!(report.pipeline.succeeded, 2);
    assert_eq!(report.pipeline.calls_made, 3);
    assert_eq!(report.pipeline.bars_inserted(), 9);
    assert_eq!(heights(&store, "600001"), vec![1, 2, 3]);
    assert_eq!(heights(&store, "600002"), vec![0, 0, 0]);

    let task = store.get_task(&report.task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!((task.start, task.end), (d(3), d(5)));
}

#[test]
fn inverted_range_is_rejected_without_a_task() {
    let store = SqliteStore::open_in_memory().unwrap();
    let provider = ScriptedProvider::default();
    let universe = universe(&["600001"]);
    let config = config(2, 195);

    let manager = BackfillManager::new(context(&config, &store, &provider, &universe));
    let err = manager.start(d(5), d(3), None).unwrap_err();

    assert!(matches!(err, BackfillError::InvalidRange { .. }));
    assert!(store.list_tasks().unwrap().is_empty());
    assert!(provider.calls().is_empty());
}

#[test]
fn budget_exhaustion_halts_then_resume_finishes() {
    let codes = ["600001", "600002", "600003", "600004", "600005"];
    let store = SqliteStore::open_in_memory().unwrap();
    let mut provider = ScriptedProvider::default();
    for code in codes {
        provider = provider.with_bars(flat_series(code, &[3, 4, 5]));
    }
    let universe = universe(&codes);

    let tight = config(2, 3);
    let manager = BackfillManager::new(context(&tight, &store, &provider, &universe));
    let halted = manager.start(d(3), d(5), None).unwrap();

    assert_eq!(halted.status, TaskStatus::RateLimited);
    assert_eq!(halted.pipeline.halt, Halt::RateLimited);
    assert_eq!(halted.pipeline.calls_made, 3);
    assert_eq!(provider.calls().len(), 3);
    // The partial second batch is kept.
    assert_eq!(halted.pipeline.outcomes.len(), 2);
    match &halted.pipeline.outcomes[1] {
        BatchOutcome::Succeeded(stats) => {
            assert!(stats.partial);
            assert_eq!(stats.fetched, 1);
        }
        other => panic!("expected partial success, got {other:?}"),
    }
    assert_eq!(store.bars_on(d(3)).unwrap().len(), 3);
    assert_eq!(
        store.get_task(&halted.task_id).unwrap().unwrap().status,
        TaskStatus::RateLimited
    );

    let roomy = config(2, 195);
    let manager = BackfillManager::new(context(&roomy, &store, &provider, &universe));
    let resumed = match manager.resume(&halted.task_id, None).unwrap() {
        ResumeOutcome::Ran(report) => report,
        ResumeOutcome::AlreadyCompleted(_) => panic!("task was not completed"),
    };

    assert_eq!(resumed.task_id, halted.task_id);
    assert_eq!(resumed.status, TaskStatus::Completed);
    assert_eq!(resumed.pipeline.calls_made, 5);
    assert_eq!(store.bars_on(d(3)).unwrap().len(), 5);
    // Rows from before the halt are ignored, not duplicated.
    match &resumed.pipeline.outcomes[0] {
        BatchOutcome::Succeeded(stats) => {
            assert_eq!(stats.bars.inserted, 0);
            assert_eq!(stats.bars.ignored, 6);
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[test]
fn resuming_a_completed_task_makes_no_calls() {
    let store = SqliteStore::open_in_memory().unwrap();
    let provider = ScriptedProvider::default().with_bars(flat_series("600001", &[3, 4]));
    let universe = universe(&["600001"]);
    let config = config(10, 195);

    let manager = BackfillManager::new(context(&config, &store, &provider, &universe));
    let report = manager.start(d(3), d(4), None).unwrap();
    let calls_before = provider.calls().len();

    let outcome = manager.resume(&report.task_id, None).unwrap();
    match outcome {
        ResumeOutcome::AlreadyCompleted(task) => assert_eq!(task.status, TaskStatus::Completed),
        ResumeOutcome::Ran(_) => panic!("completed task was re-run"),
    }
    assert_eq!(provider.calls().len(), calls_before);
}

#[test]
fn resuming_an_unknown_task_changes_nothing() {
    let store = SqliteStore::open_in_memory().unwrap();
    let provider = ScriptedProvider::default();
    let universe = universe(&["600001"]);
    let config = config(10, 195);

    let manager = BackfillManager::new(context(&config, &store, &provider, &universe));
    let err = manager.resume("backfill_missing", None).unwrap_err();

    assert!(matches!(err, BackfillError::TaskNotFound(id) if id == "backfill_missing"));
    assert!(store.list_tasks().unwrap().is_empty());
    assert!(store.instruments().unwrap().is_empty());
    assert!(provider.calls().is_empty());
}

#[test]
fn failed_batch_does_not_stop_later_batches() {
    let store = SqliteStore::open_in_memory().unwrap();
    let provider = ScriptedProvider::default()
        .failing("600001", Fail::NotFound)
        .failing("600002", Fail::NotFound)
        .with_bars(limit_series("600003", &[3]));
    let universe = universe(&["600001", "600002", "600003"]);
    let config = config(2, 195);

    let manager = BackfillManager::new(context(&config, &store, &provider, &universe));
    let report = manager.start(d(3), d(3), None).unwrap();

    assert_eq!(report.status, TaskStatus::Completed);
    assert_eq!(report.pipeline.failed, 1);
    assert_eq!(report.pipeline.succeeded, 1);
    match &report.pipeline.outcomes[0] {
        BatchOutcome::Failed { index, reason, .. } => {
            assert_eq!(*index, 0);
            assert_eq!(*reason, BatchFailure::NoRows { skipped: 2 });
        }
        other => panic!("expected failed batch, got {other:?}"),
    }
    assert_eq!(heights(&store, "600003"), vec![1]);
}

#[test]
fn fatal_provider_error_stops_the_batch_early() {
    let store = SqliteStore::open_in_memory().unwrap();
    let provider = ScriptedProvider::default()
        .failing("600001", Fail::Auth)
        .with_bars(flat_series("600002", &[3]))
        .with_bars(flat_series("600003", &[3]));
    let universe = universe(&["600001", "600002", "600003"]);
    let config = config(2, 195);

    let manager = BackfillManager::new(context(&config, &store, &provider, &universe));
    let report = manager.start(d(3), d(3), None).unwrap();

    assert_eq!(provider.calls(), vec!["600001", "600003"]);
    assert!(matches!(
        &report.pipeline.outcomes[0],
        BatchOutcome::Failed {
            reason: BatchFailure::Provider(_),
            ..
        }
    ));
    assert!(report.pipeline.outcomes[1].is_success());
}

#[test]
fn rows_ahead_of_fatal_error_get_streak_records() {
    let store = SqliteStore::open_in_memory().unwrap();
    let provider = ScriptedProvider::default()
        .with_bars(limit_series("600001", &[3, 4]))
        .failing("600002", Fail::Auth)
        .with_bars(flat_series("600003", &[3, 4]));
    let universe = universe(&["600001", "600002", "600003"]);
    let config = config(3, 195);

    let manager = BackfillManager::new(context(&config, &store, &provider, &universe));
    let report = manager.start(d(3), d(4), None).unwrap();

    assert_eq!(provider.calls(), vec!["600001", "600002"]);
    assert!(matches!(
        &report.pipeline.outcomes[0],
        BatchOutcome::Failed {
            reason: BatchFailure::Provider(_),
            ..
        }
    ));
    assert_eq!(store.bars_for_code("600001", None, None).unwrap().len(), 2);
    assert_eq!(heights(&store, "600001"), vec![1, 2]);
}

#[test]
fn malformed_file_mid_batch_skips_only_that_instrument() {
    let dir = tempfile::tempdir().unwrap();
    let header = "date,open,high,low,close,pre_close\n";
    fs::write(
        dir.path().join("600001.csv"),
        format!("{header}2025-11-03,10,11,10,11,10\n"),
    )
    .unwrap();
    fs::write(
        dir.path().join("600002.csv"),
        format!("{header}not-a-date,10,10,10,10,10\n"),
    )
    .unwrap();
    fs::write(
        dir.path().join("600003.csv"),
        format!("{header}2025-11-03,10,10,10,10,10\n"),
    )
    .unwrap();

    let store = SqliteStore::open_in_memory().unwrap();
    let provider = CsvProvider::new(dir.path());
    let universe = universe(&["600001", "600002", "600003"]);
    let config = config(3, 195);

    let manager = BackfillManager::new(context(&config, &store, &provider, &universe));
    let report = manager.start(d(3), d(3), None).unwrap();

    assert_eq!(report.status, TaskStatus::Completed);
    assert_eq!(report.pipeline.calls_made, 3);
    assert_eq!((report.pipeline.succeeded, report.pipeline.failed), (1, 0));
    match &report.pipeline.outcomes[0] {
        BatchOutcome::Succeeded(stats) => {
            assert_eq!((stats.fetched, stats.skipped), (2, 1));
            assert!(matches!(
                &stats.outcomes[1],
                InstrumentOutcome::Skipped {
                    reason: SkipReason::Provider(_),
                    ..
                }
            ));
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(heights(&store, "600001"), vec![1]);
    assert_eq!(heights(&store, "600003"), vec![0]);
    assert!(heights(&store, "600002").is_empty());
}

#[test]
fn interrupt_keeps_finished_batches_and_resume_skips_them() {
    let codes = ["600001", "600002", "600003", "600004"];
    let cancel = Arc::new(AtomicBool::new(false));
    let store = SqliteStore::open_in_memory().unwrap();
    let mut provider = ScriptedProvider::default()
        .with_bars(limit_series("600001", &[3, 4]))
        .cancelling_after(2, Arc::clone(&cancel));
    for code in &codes[1..] {
        provider = provider.with_bars(flat_series(code, &[3, 4]));
    }
    let universe = universe(&codes);
    let config = config(2, 195);

    let manager = BackfillManager::new(context(&config, &store, &provider, &universe));
    let halted = manager.start(d(3), d(4), Some(cancel.as_ref())).unwrap();

    assert_eq!(halted.status, TaskStatus::Interrupted);
    assert_eq!(halted.pipeline.halt, Halt::Interrupted);
    assert_eq!(provider.calls(), vec!["600001", "600002"]);
    assert_eq!(halted.pipeline.outcomes.len(), 1);
    assert!(halted.pipeline.outcomes[0].is_success());
    assert_eq!(heights(&store, "600001"), vec![1, 2]);
    assert_eq!(heights(&store, "600002"), vec![0, 0]);
    assert!(heights(&store, "600003").is_empty());
    assert_eq!(
        store.get_task(&halted.task_id).unwrap().unwrap().status,
        TaskStatus::Interrupted
    );

    let resumed = match manager.resume(&halted.task_id, None).unwrap() {
        ResumeOutcome::Ran(report) => report,
        ResumeOutcome::AlreadyCompleted(_) => panic!("task was not completed"),
    };
    assert_eq!(resumed.status, TaskStatus::Completed);
    match &resumed.pipeline.outcomes[0] {
        BatchOutcome::Succeeded(stats) => {
            assert_eq!((stats.bars.inserted, stats.bars.ignored), (0, 4));
            assert_eq!((stats.streaks.inserted, stats.streaks.ignored), (0, 4));
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(heights(&store, "600004"), vec![0, 0]);
}

#[test]
fn interrupt_before_first_batch_marks_task_interrupted() {
    let store = SqliteStore::open_in_memory().unwrap();
    let provider = ScriptedProvider::default().with_bars(flat_series("600001", &[3]));
    let universe = universe(&["600001"]);
    let config = config(2, 195);
    let cancel = AtomicBool::new(true);

    let manager = BackfillManager::new(context(&config, &store, &provider, &universe));
    let report = manager.start(d(3), d(3), Some(&cancel)).unwrap();

    assert_eq!(report.status, TaskStatus::Interrupted);
    assert!(report.pipeline.outcomes.is_empty());
    assert!(provider.calls().is_empty());
    assert_eq!(
        store.get_task(&report.task_id).unwrap().unwrap().status,
        TaskStatus::Interrupted
    );
}

#[test]
fn empty_universe_fails_the_task() {
    let store = SqliteStore::open_in_memory().unwrap();
    let provider = ScriptedProvider::default();
    let universe = universe(&[]);
    let config = config(2, 195);

    let manager = BackfillManager::new(context(&config, &store, &provider, &universe));
    let err = manager.start(d(3), d(4), None).unwrap_err();

    let task_id = match err {
        BackfillError::Setup { task_id, .. } => task_id,
        other => panic!("expected setup failure, got {other:?}"),
    };
    let task = store.get_task(&task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(provider.calls().is_empty());
}

// ── Run modes ───────────────────────────────────────────────────────

#[test]
fn daily_update_continues_stored_streak() {
    let store = SqliteStore::open_in_memory().unwrap();
    let provider = ScriptedProvider::default()
        .with_bars(limit_series("600001", &[3, 4, 5]))
        .with_bars(flat_series("600002", &[3, 4, 5]));
    let universe = universe(&["600001", "600002"]);
    let config = config(10, 195);
    let ctx = context(&config, &store, &provider, &universe);

    BackfillManager::new(context(&config, &store, &provider, &universe))
        .start(d(3), d(4), None)
        .unwrap();
    let report = run_daily(&ctx, d(5), None).unwrap();

    assert_eq!(report.pipeline.halt, Halt::Completed);
    assert_eq!(heights(&store, "600001"), vec![1, 2, 3]);
    assert_eq!(report.summary.limit_up_count, 1);
    assert_eq!(report.summary.highest(), 3);
    assert_eq!(report.summary.top_streaks[0].code, "600001");
}

#[test]
fn recent_run_twice_is_idempotent() {
    let store = SqliteStore::open_in_memory().unwrap();
    let provider = ScriptedProvider::default()
        .with_bars(limit_series("600001", &[3, 4, 5]))
        .with_bars(flat_series("600002", &[3, 4, 5]))
        .with_bars(flat_series("000003", &[3, 4, 5]));
    let universe = universe(&["600001", "600002", "000003"]);
    let config = config(2, 195);
    let ctx = context(&config, &store, &provider, &universe);

    let first = run_recent(&ctx, 4, d(7), None).unwrap();
    let second = run_recent(&ctx, 4, d(7), None).unwrap();

    assert_eq!(first.start, d(3));
    assert_eq!(first.pipeline.bars_inserted(), 9);
    assert_eq!(first.pipeline.streaks_inserted(), 9);
    assert_eq!(second.pipeline.bars_inserted(), 0);
    assert_eq!(second.pipeline.streaks_inserted(), 0);
    assert_eq!(heights(&store, "600001"), vec![1, 2, 3]);
}

#[test]
fn universe_limit_caps_the_run() {
    let store = SqliteStore::open_in_memory().unwrap();
    let provider = ScriptedProvider::default()
        .with_bars(flat_series("600001", &[3]))
        .with_bars(flat_series("600002", &[3]));
    let universe = universe(&["600001", "600002"]);
    let mut config = config(10, 195);
    config.universe.limit = 1;
    let ctx = context(&config, &store, &provider, &universe);

    run_recent(&ctx, 0, d(3), None).unwrap();

    assert_eq!(provider.calls(), vec!["600001"]);
    assert_eq!(store.instruments().unwrap().len(), 1);
}

#[test]
fn oversized_recent_window_is_an_error() {
    let store = SqliteStore::open_in_memory().unwrap();
    let provider = ScriptedProvider::default();
    let universe = universe(&["600001"]);
    let config = config(10, 195);
    let ctx = context(&config, &store, &provider, &universe);

    let err = run_recent(&ctx, u32::MAX, d(3), None).unwrap_err();

    assert!(matches!(err, ModeError::WindowOutOfRange { days, .. } if days == u32::MAX));
    assert!(provider.calls().is_empty());
    assert!(store.instruments().unwrap().is_empty());
}
