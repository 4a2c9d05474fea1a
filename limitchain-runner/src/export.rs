//! Export — streak CSV and per-date JSON increment files.
//!
//! An increment file `{YYYYMMDD}.json` holds one session's bars and streak
//! records. Importing increments goes through the same idempotent inserts as
//! ingestion, so importing a file twice changes nothing.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use limitchain_core::domain::{Bar, StreakRecord};
use limitchain_core::store::{Storage, StoreError, WriteReport};

use crate::query::StreakRow;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("increment {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage: {0}")]
    Store(#[from] StoreError),
}

fn io_err(path: &Path, source: std::io::Error) -> ExportError {
    ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ─── CSV export ─────────────────────────────────────────────────────

const CSV_HEADER: [&str; 10] = [
    "date",
    "code",
    "name",
    "close",
    "prev_close",
    "change_pct",
    "limit_flag",
    "streak_height",
    "fried_flag",
    "board_type",
];

fn opt(v: Option<f64>, precision: usize) -> String {
    v.map(|x| format!("{x:.precision$}")).unwrap_or_default()
}

/// Write every streak record in `[start, end]`, joined with its bar and name.
///
/// Returns the number of data rows written.
pub fn write_streaks_csv<W: Write>(
    store: &dyn Storage,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    out: W,
) -> Result<usize, ExportError> {
    let names: HashMap<String, String> = store
        .instruments()?
        .into_iter()
        .map(|i| (i.code, i.name))
        .collect();

    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(CSV_HEADER)?;

    let mut rows = 0;
    for date in store.bar_dates(start, end)? {
        let bars: HashMap<String, Bar> = store
            .bars_on(date)?
            .into_iter()
            .map(|b| (b.code.clone(), b))
            .collect();
        let mut records = store.streaks_on(date)?;
        records.sort_by(|a, b| a.code.cmp(&b.code));

        for r in records {
            let bar = bars.get(&r.code);
            let name = names.get(&r.code).cloned();
            let row = StreakRow::join(r, bar, name);
            wtr.write_record([
                row.date.to_string(),
                row.code,
                row.name.unwrap_or_default(),
                opt(row.close, 2),
                opt(row.prev_close, 2),
                opt(row.change_pct, 2),
                u8::from(row.limit_flag).to_string(),
                row.streak_height.to_string(),
                u8::from(row.fried_flag).to_string(),
                row.board_type.to_string(),
            ])?;
            rows += 1;
        }
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(rows)
}

/// CSV export to a file, creating parent directories.
pub fn export_csv(
    store: &dyn Storage,
    path: &Path,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<usize, ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let file = fs::File::create(path).map_err(|e| io_err(path, e))?;
    let rows = write_streaks_csv(store, start, end, file)?;
    info!(path = %path.display(), rows, "streak CSV written");
    Ok(rows)
}

// ─── Increments ─────────────────────────────────────────────────────

/// Bar as stored in an increment file. Missing prices are `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementBar {
    pub code: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub prev_close: Option<f64>,
    pub volume: Option<f64>,
    pub amount: Option<f64>,
}

impl IncrementBar {
    fn from_bar(bar: &Bar) -> Self {
        let finite = |v: f64| v.is_finite().then_some(v);
        Self {
            code: bar.code.clone(),
            open: finite(bar.open),
            high: finite(bar.high),
            low: finite(bar.low),
            close: finite(bar.close),
            prev_close: finite(bar.prev_close),
            volume: finite(bar.volume),
            amount: finite(bar.amount),
        }
    }

    fn into_bar(self, date: NaiveDate) -> Bar {
        let nan = |v: Option<f64>| v.unwrap_or(f64::NAN);
        Bar {
            date,
            code: self.code,
            open: nan(self.open),
            high: nan(self.high),
            low: nan(self.low),
            close: nan(self.close),
            prev_close: nan(self.prev_close),
            volume: nan(self.volume),
            amount: nan(self.amount),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementStats {
    pub bar_rows: usize,
    pub record_rows: usize,
    pub limit_up_count: usize,
}

/// One session's bars and streak records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Increment {
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub bars: Vec<IncrementBar>,
    pub records: Vec<StreakRecord>,
    pub stats: IncrementStats,
}

impl Increment {
    /// Snapshot of `date` from storage.
    pub fn from_store(store: &dyn Storage, date: NaiveDate) -> Result<Self, StoreError> {
        let bars: Vec<IncrementBar> = store.bars_on(date)?.iter().map(IncrementBar::from_bar).collect();
        let records = store.streaks_on(date)?;
        let stats = IncrementStats {
            bar_rows: bars.len(),
            record_rows: records.len(),
            limit_up_count: records.iter().filter(|r| r.limit_flag).count(),
        };
        Ok(Self {
            date,
            created_at: Utc::now(),
            bars,
            records,
            stats,
        })
    }

    pub fn to_bars(&self) -> Vec<Bar> {
        self.bars.iter().cloned().map(|b| b.into_bar(self.date)).collect()
    }
}

pub fn increment_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}.json", date.format("%Y%m%d")))
}

pub fn write_increment(dir: &Path, increment: &Increment) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    let path = increment_path(dir, increment.date);
    let json = serde_json::to_string_pretty(increment).map_err(|source| ExportError::Json {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, json).map_err(|e| io_err(&path, e))?;
    debug!(path = %path.display(), bars = increment.stats.bar_rows, "increment written");
    Ok(path)
}

pub fn read_increment(path: &Path) -> Result<Increment, ExportError> {
    let content = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&content).map_err(|source| ExportError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Write one increment per stored trading date in `[start, end]`.
/// Dates with no bars produce no file.
pub fn export_increments(
    store: &dyn Storage,
    dir: &Path,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<PathBuf>, ExportError> {
    let mut written = Vec::new();
    for date in store.bar_dates(start, end)? {
        let increment = Increment::from_store(store, date)?;
        written.push(write_increment(dir, &increment)?);
    }
    info!(dir = %dir.display(), files = written.len(), "increments exported");
    Ok(written)
}

/// Dates with an increment file in `dir`, ascending. A missing directory has none.
pub fn list_increments(dir: &Path) -> Result<Vec<NaiveDate>, ExportError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir, e)),
    };

    let mut dates = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| io_err(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.len() != 8 {
            continue;
        }
        if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y%m%d") {
            dates.push(date);
        }
    }
    dates.sort();
    Ok(dates)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub files: usize,
    pub bars: WriteReport,
    pub streaks: WriteReport,
}

/// Merge increment files into storage. `dates = None` imports every file in `dir`.
pub fn import_increments(
    store: &dyn Storage,
    dir: &Path,
    dates: Option<&[NaiveDate]>,
) -> Result<ImportReport, ExportError> {
    let targets = match dates {
        Some(dates) => dates.to_vec(),
        None => list_increments(dir)?,
    };

    let mut report = ImportReport::default();
    for date in targets {
        let path = increment_path(dir, date);
        if !path.exists() {
            warn!(path = %path.display(), "increment file missing; skipped");
            continue;
        }
        let increment = read_increment(&path)?;
        report.bars.merge(store.insert_bars(&increment.to_bars())?);
        report.streaks.merge(store.insert_streaks(&increment.records)?);
        report.files += 1;
    }
    info!(
        files = report.files,
        bars_inserted = report.bars.inserted,
        streaks_inserted = report.streaks.inserted,
        "increments imported"
    );
    Ok(report)
}
