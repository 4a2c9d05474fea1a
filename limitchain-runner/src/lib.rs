//! LimitChain Runner — ingestion orchestration, backfill tasks, reporting.
//!
//! This crate builds on `limitchain-core` to provide:
//! - TOML configuration and logging setup
//! - The batched ingestion pipeline driven through the rate governor
//! - Named backfill tasks with resume
//! - Recent-window and single-day run modes
//! - Summaries, queries, data checks, CSV export and JSON increments

pub mod backfill;
pub mod config;
pub mod context;
pub mod export;
pub mod logging;
pub mod modes;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod selftest;
pub mod summary;

pub use backfill::{new_task_id, BackfillError, BackfillManager, BackfillReport, ResumeOutcome};
pub use config::{ConfigError, ProviderKind, TrackerConfig};
pub use context::{RunContext, UniverseError};
pub use export::{
    export_csv, export_increments, import_increments, list_increments, ExportError, ImportReport,
    Increment,
};
pub use logging::{init_logging, LoggingError};
pub use modes::{run_daily, run_recent, ModeError, ModeReport};
pub use pipeline::{
    BatchFailure, BatchOutcome, BatchStats, Halt, IngestPipeline, PipelineReport, StreakScope,
};
pub use progress::{IngestProgress, SilentProgress, StdoutProgress};
pub use query::{DataCheck, MaxStreak, StreakRow};
pub use selftest::{run_selftest, verify_stored, Check, Mismatch};
pub use summary::{daily_summary, DailySummary};
