//! Storage — idempotent persistence of bars, streak records and tasks.
//!
//! Bars and streak records are unique on (date, code). A conflicting insert
//! is ignored and counted, never an error: overlapping runs and resumed
//! backfills write the same keys again.

pub mod sqlite;

pub use sqlite::SqliteStore;

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{Bar, BackfillTask, Instrument, StreakRecord, TaskStatus};

/// Default rows per insert statement. Nine bound columns per bar keeps one
/// statement under SQLite's 999 host-parameter ceiling.
pub const DEFAULT_WRITE_CHUNK: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task already exists: {0}")]
    DuplicateTask(String),

    #[error("invalid write chunk size {0}")]
    InvalidChunkSize(usize),
}

/// Rows written versus rows ignored on (date, code) conflict.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub inserted: usize,
    pub ignored: usize,
    pub chunks: usize,
}

impl WriteReport {
    pub fn merge(&mut self, other: WriteReport) {
        self.inserted += other.inserted;
        self.ignored += other.ignored;
        self.chunks += other.chunks;
    }

    pub fn attempted(&self) -> usize {
        self.inserted + self.ignored
    }
}

/// Rows removed by a prune.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub bars: usize,
    pub streaks: usize,
}

/// Persistence boundary used by the pipeline, backfill and reporting.
pub trait Storage: Send {
    /// Upsert instrument metadata. Existing codes are overwritten, none are deleted.
    fn replace_instruments(&self, instruments: &[Instrument]) -> Result<usize, StoreError>;
    fn instruments(&self) -> Result<Vec<Instrument>, StoreError>;
    fn instrument(&self, code: &str) -> Result<Option<Instrument>, StoreError>;

    fn insert_bars(&self, bars: &[Bar]) -> Result<WriteReport, StoreError>;
    fn insert_streaks(&self, records: &[StreakRecord]) -> Result<WriteReport, StoreError>;

    /// One instrument's bars in ascending date order, optionally bounded (inclusive).
    fn bars_for_code(
        &self,
        code: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, StoreError>;
    fn bars_on(&self, date: NaiveDate) -> Result<Vec<Bar>, StoreError>;
    /// Distinct trading dates with stored bars, ascending.
    fn bar_dates(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<NaiveDate>, StoreError>;

    fn streaks_on(&self, date: NaiveDate) -> Result<Vec<StreakRecord>, StoreError>;
    fn streaks_for_code(
        &self,
        code: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<StreakRecord>, StoreError>;
    fn latest_streak_date(&self) -> Result<Option<NaiveDate>, StoreError>;

    fn create_task(&self, task: &BackfillTask) -> Result<(), StoreError>;
    /// Fails with `TaskNotFound` when no row matches.
    fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<(), StoreError>;
    fn get_task(&self, id: &str) -> Result<Option<BackfillTask>, StoreError>;
    /// All tasks, newest first.
    fn list_tasks(&self) -> Result<Vec<BackfillTask>, StoreError>;

    /// Delete bars and streak records dated before `date`.
    fn prune_before(&self, date: NaiveDate) -> Result<PruneReport, StoreError>;
}
