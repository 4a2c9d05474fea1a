//! LimitChain CLI — ingestion, backfill tasks and reporting commands.
//!
//! Commands:
//! - `run` — recent-window ingest, then a summary of the last day
//! - `backfill` / `resume` / `tasks` — named, resumable historical loads
//! - `daily` — single-day update that continues stored streaks
//! - `summary`, `query`, `check`, `verify` — read-only reporting
//! - `export csv`, `increments` — CSV export and per-date JSON increments
//! - `prune` — drop rows before a date
//! - `selftest` — built-in classifier and streak engine checks

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use limitchain_core::data::schema::parse_date;
use limitchain_core::data::{
    CsvProvider, DataProvider, StaticUniverse, TushareProvider, UniverseProvider,
};
use limitchain_core::domain::TaskStatus;
use limitchain_core::store::{SqliteStore, Storage};
use limitchain_runner::export::{
    export_csv, export_increments, import_increments, list_increments,
};
use limitchain_runner::query::{check_data, fried_boards, high_streaks, max_streak, streak_history, StreakRow};
use limitchain_runner::{
    daily_summary, init_logging, run_daily, run_recent, run_selftest, verify_stored,
    BackfillManager, BackfillReport, ModeReport, ProviderKind, ResumeOutcome, RunContext,
    StdoutProgress, TrackerConfig,
};

/// Loaded when `--config` is not given and the file exists.
const DEFAULT_CONFIG: &str = "limitchain.toml";

#[derive(Parser)]
#[command(
    name = "limitchain",
    about = "LimitChain CLI — limit-up streak tracking for A-share equities"
)]
struct Cli {
    /// Path to a TOML config file. Defaults to ./limitchain.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the last N days for the whole universe.
    Run {
        /// Window length in days. Defaults to `ingest.recent_days`.
        #[arg(long)]
        days: Option<u32>,
    },
    /// Start a named backfill task over a date range.
    Backfill {
        /// Start date (YYYY-MM-DD or YYYYMMDD). Defaults to `ingest.history_start`.
        #[arg(long, value_parser = date_arg)]
        start: Option<NaiveDate>,

        /// End date. Defaults to today.
        #[arg(long, value_parser = date_arg)]
        end: Option<NaiveDate>,

        /// Instruments per batch. Overrides `ingest.batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Resume a backfill task from its first batch.
    Resume {
        task_id: String,
    },
    /// List backfill tasks, newest first.
    Tasks,
    /// Fetch one session and continue stored streaks.
    Daily {
        /// Target date. Defaults to today.
        #[arg(long, value_parser = date_arg)]
        date: Option<NaiveDate>,
    },
    /// Limit-up counts and streak distribution for a date.
    Summary {
        /// Defaults to the latest date with streak records.
        #[arg(long, value_parser = date_arg)]
        date: Option<NaiveDate>,

        /// Print JSON instead of text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Query stored streaks.
    Query {
        #[command(subcommand)]
        action: QueryAction,
    },
    /// Report missing prices and abnormal moves.
    Check {
        #[arg(long, value_parser = date_arg)]
        start: Option<NaiveDate>,
        #[arg(long, value_parser = date_arg)]
        end: Option<NaiveDate>,
    },
    /// Compare one instrument's stored records with a full replay.
    Verify {
        code: String,
    },
    /// Export stored data.
    Export {
        #[command(subcommand)]
        action: ExportAction,
    },
    /// Per-date JSON increment files.
    Increments {
        #[command(subcommand)]
        action: IncrementAction,
    },
    /// Delete bars and streak records dated before a date.
    Prune {
        #[arg(long, value_parser = date_arg)]
        before: NaiveDate,
    },
    /// Run the built-in classifier and streak engine checks.
    Selftest,
}

#[derive(Subcommand)]
enum QueryAction {
    /// Instruments at or above a streak height on a date.
    High {
        #[arg(long, value_parser = date_arg)]
        date: Option<NaiveDate>,
        #[arg(long, default_value_t = 2)]
        min_height: u32,
    },
    /// Streak history of one instrument.
    History {
        code: String,
        #[arg(long, value_parser = date_arg)]
        start: Option<NaiveDate>,
        #[arg(long, value_parser = date_arg)]
        end: Option<NaiveDate>,
    },
    /// Highest streak ever recorded for one instrument.
    Max { code: String },
    /// Fried boards on a date.
    Fried {
        #[arg(long, value_parser = date_arg)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum ExportAction {
    /// Streak records joined with bars, as CSV.
    Csv {
        #[arg(long, default_value = "data/streaks.csv")]
        out: PathBuf,
        #[arg(long, value_parser = date_arg)]
        start: Option<NaiveDate>,
        #[arg(long, value_parser = date_arg)]
        end: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum IncrementAction {
    /// Write one JSON file per stored trading date.
    Export {
        #[arg(long, default_value = "data/increments")]
        dir: PathBuf,
        #[arg(long, value_parser = date_arg)]
        start: Option<NaiveDate>,
        #[arg(long, value_parser = date_arg)]
        end: Option<NaiveDate>,
    },
    /// Merge increment files into the database.
    Import {
        #[arg(long, default_value = "data/increments")]
        dir: PathBuf,
        /// Only these dates. Defaults to every file in the directory.
        #[arg(long = "date", value_parser = date_arg)]
        dates: Vec<NaiveDate>,
    },
    /// List dates with an increment file.
    List {
        #[arg(long, default_value = "data/increments")]
        dir: PathBuf,
    },
}

fn date_arg(s: &str) -> Result<NaiveDate, String> {
    parse_date("cli", s).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(e) = init_logging() {
        eprintln!("logging disabled: {e}");
    }

    if let Commands::Selftest = cli.command {
        return run_selftest_cmd();
    }

    let config = load_config(cli.config.as_deref())?;
    let store = open_store(&config)?;

    match cli.command {
        Commands::Run { days } => {
            let days = days.unwrap_or(config.ingest.recent_days);
            with_sources(&config, &store, |ctx, cancel| {
                let report = run_recent(&ctx, days, today(), Some(cancel))?;
                print_mode_report(&report);
                Ok(())
            })
        }
        Commands::Backfill {
            start,
            end,
            batch_size,
        } => {
            let mut config = config;
            if let Some(n) = batch_size {
                if n == 0 {
                    bail!("--batch-size must be positive");
                }
                config.ingest.batch_size = n;
            }
            let start = start.unwrap_or(config.ingest.history_start);
            let end = end.unwrap_or_else(today);
            if start > end {
                bail!("--start {start} is after --end {end}");
            }
            with_sources(&config, &store, |ctx, cancel| {
                let report = BackfillManager::new(ctx).start(start, end, Some(cancel))?;
                print_backfill_report(&report);
                Ok(())
            })
        }
        Commands::Resume { task_id } => with_sources(&config, &store, |ctx, cancel| {
            match BackfillManager::new(ctx).resume(&task_id, Some(cancel))? {
                ResumeOutcome::AlreadyCompleted(task) => {
                    println!("Task {} already completed ({} to {}).", task.id, task.start, task.end);
                }
                ResumeOutcome::Ran(report) => print_backfill_report(&report),
            }
            Ok(())
        }),
        Commands::Tasks => {
            let tasks = store.list_tasks()?;
            if tasks.is_empty() {
                println!("No backfill tasks.");
            }
            for t in tasks {
                println!(
                    "{:<40} {:<12} {} .. {}  updated {}",
                    t.id,
                    t.status.as_str(),
                    t.start,
                    t.end,
                    t.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
        Commands::Daily { date } => {
            let date = date.unwrap_or_else(today);
            with_sources(&config, &store, |ctx, cancel| {
                let report = run_daily(&ctx, date, Some(cancel))?;
                print_mode_report(&report);
                Ok(())
            })
        }
        Commands::Summary { date, json } => {
            let date = resolve_date(&store, date)?;
            let summary = daily_summary(&store, date)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{summary}");
            }
            Ok(())
        }
        Commands::Query { action } => run_query(&store, action),
        Commands::Check { start, end } => {
            let check = check_data(&store, start, end)?;
            println!("Bars checked:        {}", check.bars);
            println!("Missing open:        {}", check.missing_open);
            println!("Missing close:       {}", check.missing_close);
            println!("Missing prev close:  {}", check.missing_prev_close);
            if check.abnormal.is_empty() {
                println!("No moves beyond 50%.");
            } else {
                println!("Moves beyond 50% (largest first):");
                for m in check.abnormal.iter().take(20) {
                    println!(
                        "  {} {} close {:.2} prev {:.2} change {:+.2}%",
                        m.date, m.code, m.close, m.prev_close, m.change_pct
                    );
                }
            }
            Ok(())
        }
        Commands::Verify { code } => {
            let mismatches = verify_stored(&store, &config.limits, &code)?;
            if mismatches.is_empty() {
                println!("{code}: stored records match a full replay.");
                return Ok(());
            }
            for m in &mismatches {
                println!(
                    "  {}: stored height {} ({}), replay height {} ({})",
                    m.date,
                    m.stored.streak_height,
                    m.stored.board_type,
                    m.replayed.streak_height,
                    m.replayed.board_type
                );
            }
            bail!("{code}: {} records differ from a full replay", mismatches.len())
        }
        Commands::Export {
            action: ExportAction::Csv { out, start, end },
        } => {
            let rows = export_csv(&store, &out, start, end)?;
            println!("Wrote {rows} rows to {}", out.display());
            Ok(())
        }
        Commands::Increments { action } => run_increments(&store, action),
        Commands::Prune { before } => {
            let report = store.prune_before(before)?;
            println!(
                "Pruned {} bars and {} streak records before {before}.",
                report.bars, report.streaks
            );
            Ok(())
        }
        Commands::Selftest => run_selftest_cmd(),
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn load_config(path: Option<&Path>) -> Result<TrackerConfig> {
    match path {
        Some(path) => TrackerConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Ok(TrackerConfig::from_file(Path::new(DEFAULT_CONFIG))?)
        }
        None => Ok(TrackerConfig::default()),
    }
}

fn open_store(config: &TrackerConfig) -> Result<SqliteStore> {
    let store = SqliteStore::open(&config.storage.database)
        .with_context(|| format!("failed to open {}", config.storage.database.display()))?
        .with_chunk_size(config.storage.write_chunk_size)?;
    Ok(store)
}

/// Build providers from config, install the Ctrl-C flag, and run `f`.
fn with_sources<F>(config: &TrackerConfig, store: &SqliteStore, f: F) -> Result<()>
where
    F: FnOnce(RunContext<'_>, &AtomicBool) -> Result<()>,
{
    let bars: Box<dyn DataProvider> = match config.provider.kind {
        ProviderKind::Tushare => {
            Box::new(TushareProvider::new(config.provider.tushare(), config.limits.clone())?)
        }
        ProviderKind::Csv => Box::new(CsvProvider::new(&config.provider.csv_dir)),
    };
    let universe: Box<dyn UniverseProvider> = match (&config.universe.file, config.provider.kind) {
        (Some(file), _) => Box::new(StaticUniverse::from_file(file, config.limits.clone())?),
        (None, ProviderKind::Tushare) => {
            Box::new(TushareProvider::new(config.provider.tushare(), config.limits.clone())?)
        }
        (None, ProviderKind::Csv) => {
            bail!("the csv provider needs [universe] file to list instruments")
        }
    };
    if !bars.is_available() {
        bail!(
            "provider '{}' is not available (missing token or data directory)",
            bars.name()
        );
    }

    let cancel = install_interrupt_flag();
    let progress = StdoutProgress;
    let ctx = RunContext {
        config,
        store,
        provider: bars.as_ref(),
        universe: universe.as_ref(),
        progress: &progress,
    };
    f(ctx, cancel.as_ref())
}

/// Ctrl-C sets the returned flag; batches already persisted stay persisted.
fn install_interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = %e, "cannot install Ctrl-C handler");
                return;
            }
        };
        rt.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping after the current call");
                handler_flag.store(true, Ordering::Relaxed);
            }
        });
    });
    flag
}

fn resolve_date(store: &SqliteStore, date: Option<NaiveDate>) -> Result<NaiveDate> {
    match date {
        Some(d) => Ok(d),
        None => match store.latest_streak_date()? {
            Some(d) => Ok(d),
            None => bail!("no streak records stored yet; pass --date"),
        },
    }
}

fn run_query(store: &SqliteStore, action: QueryAction) -> Result<()> {
    match action {
        QueryAction::High { date, min_height } => {
            let date = resolve_date(store, date)?;
            let rows = high_streaks(store, date, min_height)?;
            println!("{} instruments at {min_height}+ boards on {date}:", rows.len());
            print_rows(&rows);
        }
        QueryAction::History { code, start, end } => {
            let rows = streak_history(store, &code, start, end)?;
            if rows.is_empty() {
                println!("No records for {code}.");
            }
            print_rows(&rows);
        }
        QueryAction::Max { code } => match max_streak(store, &code)? {
            Some(best) => println!("{code}: highest streak {} boards on {}", best.height, best.date),
            None => println!("{code}: no limit-up recorded"),
        },
        QueryAction::Fried { date } => {
            let date = resolve_date(store, date)?;
            let rows = fried_boards(store, date)?;
            println!("{} fried boards on {date}:", rows.len());
            print_rows(&rows);
        }
    }
    Ok(())
}

fn run_increments(store: &SqliteStore, action: IncrementAction) -> Result<()> {
    match action {
        IncrementAction::Export { dir, start, end } => {
            let written = export_increments(store, &dir, start, end)?;
            println!("Wrote {} increment files to {}", written.len(), dir.display());
        }
        IncrementAction::Import { dir, dates } => {
            let selected = (!dates.is_empty()).then_some(dates.as_slice());
            let report = import_increments(store, &dir, selected)?;
            println!(
                "Imported {} files: {} bars (+{} new), {} records (+{} new)",
                report.files,
                report.bars.attempted(),
                report.bars.inserted,
                report.streaks.attempted(),
                report.streaks.inserted
            );
        }
        IncrementAction::List { dir } => {
            let dates = list_increments(&dir)?;
            if dates.is_empty() {
                println!("No increment files in {}", dir.display());
            }
            for date in dates {
                println!("{date}");
            }
        }
    }
    Ok(())
}

fn run_selftest_cmd() -> Result<()> {
    let checks = run_selftest();
    let failed = checks.iter().filter(|c| !c.passed).count();
    for check in &checks {
        println!("{check}");
    }
    if failed > 0 {
        bail!("{failed} of {} self-test checks failed", checks.len());
    }
    info!(checks = checks.len(), "self-test passed");
    Ok(())
}

fn print_rows(rows: &[StreakRow]) {
    for r in rows {
        println!(
            "  {} {:<8} {:<10} {:>2} boards  {:<8} close {:>8}  chg {:>7}",
            r.date,
            r.code,
            r.name.as_deref().unwrap_or("-"),
            r.streak_height,
            r.board_type.as_str(),
            r.close.map(|c| format!("{c:.2}")).unwrap_or_else(|| "-".into()),
            r.change_pct
                .map(|c| format!("{c:+.2}%"))
                .unwrap_or_else(|| "-".into()),
        );
    }
}

fn print_backfill_report(report: &BackfillReport) {
    println!(
        "Task {}: {} ({} bars, {} streak records inserted)",
        report.task_id,
        report.status,
        report.pipeline.bars_inserted(),
        report.pipeline.streaks_inserted()
    );
    if matches!(report.status, TaskStatus::RateLimited | TaskStatus::Interrupted) {
        println!("Resume with: limitchain resume {}", report.task_id);
    }
}

fn print_mode_report(report: &ModeReport) {
    println!(
        "Ingested {} .. {}: {} bars, {} streak records inserted ({}).",
        report.start,
        report.end,
        report.pipeline.bars_inserted(),
        report.pipeline.streaks_inserted(),
        report.pipeline.halt
    );
    print!("{}", report.summary);
}
