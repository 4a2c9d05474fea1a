//! Backfill tasks — a named, persisted wrapper around the batch loop.
//!
//! A task is created `pending`, moves to `running` when the loop begins, and
//! ends as `completed`, `rate_limited`, `interrupted` or `failed`. Resuming a
//! task that is not `completed` replays the whole loop from the first batch
//! over the original range; idempotent storage absorbs the overlap.

use chrono::{NaiveDate, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tracing::{error, info, info_span, warn};

use limitchain_core::domain::{BackfillTask, TaskStatus};
use limitchain_core::store::StoreError;

use crate::context::{RunContext, UniverseError};
use crate::pipeline::{Halt, PipelineReport};

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("task {task_id} failed during setup: {source}")]
    Setup {
        task_id: String,
        #[source]
        source: UniverseError,
    },

    #[error("storage: {0}")]
    Store(#[from] StoreError),
}

/// Finished (or halted) backfill run.
#[derive(Debug, Clone)]
pub struct BackfillReport {
    pub task_id: String,
    pub status: TaskStatus,
    pub pipeline: PipelineReport,
}

#[derive(Debug, Clone)]
pub enum ResumeOutcome {
    /// The task had already completed; nothing was run.
    AlreadyCompleted(BackfillTask),
    Ran(BackfillReport),
}

static TASK_SEQ: AtomicU64 = AtomicU64::new(0);

/// `backfill_{start}_{end}_{8 hex}` with dates as `YYYYMMDD`.
pub fn new_task_id(start: NaiveDate, end: NaiveDate) -> String {
    let seed = format!(
        "{start}:{end}:{}:{}:{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        std::process::id(),
        TASK_SEQ.fetch_add(1, Ordering::Relaxed)
    );
    let hash = blake3::hash(seed.as_bytes()).to_hex();
    format!(
        "backfill_{}_{}_{}",
        start.format("%Y%m%d"),
        end.format("%Y%m%d"),
        &hash.as_str()[..8]
    )
}

fn status_for(halt: Halt) -> TaskStatus {
    match halt {
        Halt::Completed => TaskStatus::Completed,
        Halt::RateLimited => TaskStatus::RateLimited,
        Halt::Interrupted => TaskStatus::Interrupted,
    }
}

pub struct BackfillManager<'a> {
    ctx: RunContext<'a>,
}

impl<'a> BackfillManager<'a> {
    pub fn new(ctx: RunContext<'a>) -> Self {
        Self { ctx }
    }

    /// Create a task for `[start, end]` and run it.
    pub fn start(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: Option<&AtomicBool>,
    ) -> Result<BackfillReport, BackfillError> {
        if start > end {
            return Err(BackfillError::InvalidRange { start, end });
        }
        let task = BackfillTask::pending(new_task_id(start, end), start, end);
        self.ctx.store.create_task(&task)?;
        info!(task_id = %task.id, %start, %end, "backfill task created");
        self.execute(&task, cancel)
    }

    /// Re-run a task by id. Completed tasks are left untouched.
    pub fn resume(
        &self,
        task_id: &str,
        cancel: Option<&AtomicBool>,
    ) -> Result<ResumeOutcome, BackfillError> {
        let task = self
            .ctx
            .store
            .get_task(task_id)?
            .ok_or_else(|| BackfillError::TaskNotFound(task_id.to_string()))?;

        if task.status == TaskStatus::Completed {
            info!(task_id, "task already completed; nothing to resume");
            return Ok(ResumeOutcome::AlreadyCompleted(task));
        }

        info!(task_id, previous = %task.status, "resuming task from first batch");
        self.execute(&task, cancel).map(ResumeOutcome::Ran)
    }

    fn execute(
        &self,
        task: &BackfillTask,
        cancel: Option<&AtomicBool>,
    ) -> Result<BackfillReport, BackfillError> {
        let _span = info_span!("backfill", task_id = %task.id).entered();

        let instruments = match self.ctx.refresh_universe() {
            Ok(instruments) => instruments,
            Err(source) => {
                error!(error = %source, "backfill setup failed");
                self.ctx.store.update_task_status(&task.id, TaskStatus::Failed)?;
                return Err(BackfillError::Setup {
                    task_id: task.id.clone(),
                    source,
                });
            }
        };

        self.ctx.store.update_task_status(&task.id, TaskStatus::Running)?;
        let mut governor = self.ctx.governor();
        let pipeline = self
            .ctx
            .pipeline()
            .run(&instruments, task.start, task.end, &mut governor, cancel);

        let status = status_for(pipeline.halt);
        self.ctx.store.update_task_status(&task.id, status)?;
        match status {
            TaskStatus::Completed => info!(%status, "backfill finished"),
            _ => warn!(%status, calls_made = pipeline.calls_made, "backfill halted; resume with the same task id"),
        }

        Ok(BackfillReport {
            task_id: task.id.clone(),
            status,
            pipeline,
        })
    }
}
