//! Progress observers for the batch loop.

use crate::pipeline::{BatchOutcome, PipelineReport};

/// Progress callback for batched ingestion.
pub trait IngestProgress: Send + Sync {
    /// Called before a batch is fetched.
    fn on_batch_start(&self, index: usize, total: usize, size: usize);

    /// Called after a batch is persisted or recorded as failed.
    fn on_batch_complete(&self, total: usize, outcome: &BatchOutcome);

    /// Called once when the loop stops, for any reason.
    fn on_run_complete(&self, report: &PipelineReport);
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl IngestProgress for StdoutProgress {
    fn on_batch_start(&self, index: usize, total: usize, size: usize) {
        println!("[{}/{}] Fetching batch of {size}...", index + 1, total);
    }

    fn on_batch_complete(&self, _total: usize, outcome: &BatchOutcome) {
        match outcome {
            BatchOutcome::Succeeded(stats) => println!(
                "  OK: {} fetched, {} skipped, {} bars (+{} new), {} limit-ups{}",
                stats.fetched,
                stats.skipped,
                stats.bars.attempted(),
                stats.bars.inserted,
                stats.limit_ups,
                if stats.partial { " [partial]" } else { "" },
            ),
            BatchOutcome::Failed { reason, .. } => println!("  FAIL: {reason}"),
        }
    }

    fn on_run_complete(&self, report: &PipelineReport) {
        println!(
            "\nIngest {}: {}/{} batches succeeded, {} failed, {} calls",
            report.halt,
            report.succeeded,
            report.batches_total,
            report.failed,
            report.calls_made
        );
    }
}

/// Observer that discards everything, for tests and quiet runs.
pub struct SilentProgress;

impl IngestProgress for SilentProgress {
    fn on_batch_start(&self, _index: usize, _total: usize, _size: usize) {}
    fn on_batch_complete(&self, _total: usize, _outcome: &BatchOutcome) {}
    fn on_run_complete(&self, _report: &PipelineReport) {}
}
