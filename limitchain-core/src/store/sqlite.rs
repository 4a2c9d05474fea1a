//! SQLite storage backend.

use chrono::{NaiveDate, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use super::{PruneReport, Storage, StoreError, WriteReport, DEFAULT_WRITE_CHUNK};
use crate::domain::{Bar, BackfillTask, Instrument, StreakRecord, TaskStatus};

/// SQLite's default SQLITE_MAX_VARIABLE_NUMBER on older builds.
const MAX_HOST_PARAMETERS: usize = 999;
const BAR_COLUMNS: usize = 9;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS instruments (
    code              TEXT PRIMARY KEY,
    name              TEXT NOT NULL,
    market_class      TEXT NOT NULL,
    limit_ratio       REAL NOT NULL,
    special_treatment INTEGER NOT NULL DEFAULT 0,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_bars (
    date       TEXT NOT NULL,
    code       TEXT NOT NULL,
    open       REAL,
    high       REAL,
    low        REAL,
    close      REAL,
    prev_close REAL,
    volume     REAL,
    amount     REAL,
    UNIQUE(date, code)
);
CREATE INDEX IF NOT EXISTS idx_bars_code_date ON daily_bars(code, date);

CREATE TABLE IF NOT EXISTS streak_records (
    date          TEXT NOT NULL,
    code          TEXT NOT NULL,
    limit_flag    INTEGER NOT NULL DEFAULT 0,
    streak_height INTEGER NOT NULL DEFAULT 0,
    fried_flag    INTEGER NOT NULL DEFAULT 0,
    board_type    TEXT NOT NULL,
    UNIQUE(date, code)
);
CREATE INDEX IF NOT EXISTS idx_streaks_date_height ON streak_records(date, streak_height);
CREATE INDEX IF NOT EXISTS idx_streaks_code_date ON streak_records(code, date);

CREATE TABLE IF NOT EXISTS backfill_tasks (
    id         TEXT PRIMARY KEY,
    start_date TEXT NOT NULL,
    end_date   TEXT NOT NULL,
    status     TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Single-connection SQLite store.
pub struct SqliteStore {
    conn: Connection,
    chunk_size: usize,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened sqlite store");
        Self::init(conn)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            chunk_size: DEFAULT_WRITE_CHUNK,
        })
    }

    /// Rows per insert statement. Must keep every statement under the host-parameter ceiling.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self, StoreError> {
        if chunk_size == 0 || chunk_size * BAR_COLUMNS > MAX_HOST_PARAMETERS {
            return Err(StoreError::InvalidChunkSize(chunk_size));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Multi-row `INSERT OR IGNORE`, one transaction per chunk.
    fn insert_chunked<T>(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[T],
        to_values: impl Fn(&T) -> Vec<Value>,
    ) -> Result<WriteReport, StoreError> {
        let mut report = WriteReport::default();
        let placeholder = format!("({})", vec!["?"; columns.len()].join(", "));

        for chunk in rows.chunks(self.chunk_size) {
            let sql = format!(
                "INSERT OR IGNORE INTO {table} ({}) VALUES {}",
                columns.join(", "),
                vec![placeholder.as_str(); chunk.len()].join(", ")
            );
            let values: Vec<Value> = chunk.iter().flat_map(&to_values).collect();

            let tx = self.conn.unchecked_transaction()?;
            let inserted = tx.execute(&sql, params_from_iter(values))?;
            tx.commit()?;

            report.merge(WriteReport {
                inserted,
                ignored: chunk.len() - inserted,
                chunks: 1,
            });
        }

        if report.ignored > 0 {
            warn!(
                table,
                inserted = report.inserted,
                ignored = report.ignored,
                "duplicate (date, code) rows ignored"
            );
        } else {
            debug!(table, inserted = report.inserted, chunks = report.chunks, "rows written");
        }
        Ok(report)
    }

    fn query_bars(&self, sql: &str, args: Vec<Value>) -> Result<Vec<Bar>, StoreError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params_from_iter(args), bar_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn query_streaks(&self, sql: &str, args: Vec<Value>) -> Result<Vec<StreakRecord>, StoreError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params_from_iter(args), streak_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn real(v: f64) -> Value {
    if v.is_finite() {
        Value::Real(v)
    } else {
        Value::Null
    }
}

fn date_value(d: NaiveDate) -> Value {
    Value::Text(d.format("%Y-%m-%d").to_string())
}

/// `WHERE` fragment and bound values for an optional inclusive date range.
fn date_bounds(start: Option<NaiveDate>, end: Option<NaiveDate>) -> (String, Vec<Value>) {
    let mut clause = String::new();
    let mut args = Vec::new();
    if let Some(s) = start {
        clause.push_str(" AND date >= ?");
        args.push(date_value(s));
    }
    if let Some(e) = end {
        clause.push_str(" AND date <= ?");
        args.push(date_value(e));
    }
    (clause, args)
}

fn nan_if_null(row: &Row, idx: usize) -> rusqlite::Result<f64> {
    Ok(row.get::<_, Option<f64>>(idx)?.unwrap_or(f64::NAN))
}

fn parsed<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn bar_from_row(row: &Row) -> rusqlite::Result<Bar> {
    Ok(Bar {
        date: row.get(0)?,
        code: row.get(1)?,
        open: nan_if_null(row, 2)?,
        high: nan_if_null(row, 3)?,
        low: nan_if_null(row, 4)?,
        close: nan_if_null(row, 5)?,
        prev_close: nan_if_null(row, 6)?,
        volume: nan_if_null(row, 7)?,
        amount: nan_if_null(row, 8)?,
    })
}

fn streak_from_row(row: &Row) -> rusqlite::Result<StreakRecord> {
    Ok(StreakRecord {
        date: row.get(0)?,
        code: row.get(1)?,
        limit_flag: row.get(2)?,
        streak_height: row.get(3)?,
        fried_flag: row.get(4)?,
        board_type: parsed(row, 5)?,
    })
}

fn instrument_from_row(row: &Row) -> rusqlite::Result<Instrument> {
    Ok(Instrument {
        code: row.get(0)?,
        name: row.get(1)?,
        market_class: parsed(row, 2)?,
        limit_ratio: row.get(3)?,
        special_treatment: row.get(4)?,
    })
}

fn task_from_row(row: &Row) -> rusqlite::Result<BackfillTask> {
    Ok(BackfillTask {
        id: row.get(0)?,
        start: row.get(1)?,
        end: row.get(2)?,
        status: parsed(row, 3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const BAR_SELECT: &str =
    "SELECT date, code, open, high, low, close, prev_close, volume, amount FROM daily_bars";
const STREAK_SELECT: &str =
    "SELECT date, code, limit_flag, streak_height, fried_flag, board_type FROM streak_records";
const TASK_SELECT: &str =
    "SELECT id, start_date, end_date, status, created_at, updated_at FROM backfill_tasks";

impl Storage for SqliteStore {
    fn replace_instruments(&self, instruments: &[Instrument]) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut written = 0;
        for chunk in instruments.chunks(self.chunk_size) {
            let tx = self.conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO instruments \
                     (code, name, market_class, limit_ratio, special_treatment, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for inst in chunk {
                    written += stmt.execute(params![
                        inst.code,
                        inst.name,
                        inst.market_class.as_str(),
                        inst.limit_ratio,
                        inst.special_treatment,
                        now,
                    ])?;
                }
            }
            tx.commit()?;
        }
        debug!(count = written, "instruments refreshed");
        Ok(written)
    }

    fn instruments(&self) -> Result<Vec<Instrument>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT code, name, market_class, limit_ratio, special_treatment \
             FROM instruments ORDER BY code",
        )?;
        let rows = stmt.query_map([], instrument_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn instrument(&self, code: &str) -> Result<Option<Instrument>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT code, name, market_class, limit_ratio, special_treatment \
                 FROM instruments WHERE code = ?1",
                [code],
                instrument_from_row,
            )
            .optional()?)
    }

    fn insert_bars(&self, bars: &[Bar]) -> Result<WriteReport, StoreError> {
        self.insert_chunked(
            "daily_bars",
            &[
                "date",
                "code",
                "open",
                "high",
                "low",
                "close",
                "prev_close",
                "volume",
                "amount",
            ],
            bars,
            |b| {
                vec![
                    date_value(b.date),
                    Value::Text(b.code.clone()),
                    real(b.open),
                    real(b.high),
                    real(b.low),
                    real(b.close),
                    real(b.prev_close),
                    real(b.volume),
                    real(b.amount),
                ]
            },
        )
    }

    fn insert_streaks(&self, records: &[StreakRecord]) -> Result<WriteReport, StoreError> {
        self.insert_chunked(
            "streak_records",
            &[
                "date",
                "code",
                "limit_flag",
                "streak_height",
                "fried_flag",
                "board_type",
            ],
            records,
            |r| {
                vec![
                    date_value(r.date),
                    Value::Text(r.code.clone()),
                    Value::Integer(r.limit_flag as i64),
                    Value::Integer(i64::from(r.streak_height)),
                    Value::Integer(r.fried_flag as i64),
                    Value::Text(r.board_type.as_str().to_string()),
                ]
            },
        )
    }

    fn bars_for_code(
        &self,
        code: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, StoreError> {
        let (bounds, mut args) = date_bounds(start, end);
        args.insert(0, Value::Text(code.to_string()));
        self.query_bars(
            &format!("{BAR_SELECT} WHERE code = ?{bounds} ORDER BY date"),
            args,
        )
    }

    fn bars_on(&self, date: NaiveDate) -> Result<Vec<Bar>, StoreError> {
        self.query_bars(
            &format!("{BAR_SELECT} WHERE date = ? ORDER BY code"),
            vec![date_value(date)],
        )
    }

    fn bar_dates(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<NaiveDate>, StoreError> {
        let (bounds, args) = date_bounds(start, end);
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT DISTINCT date FROM daily_bars WHERE 1 = 1{bounds} ORDER BY date"
        ))?;
        let rows = stmt.query_map(params_from_iter(args), |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn streaks_on(&self, date: NaiveDate) -> Result<Vec<StreakRecord>, StoreError> {
        self.query_streaks(
            &format!("{STREAK_SELECT} WHERE date = ? ORDER BY streak_height DESC, code"),
            vec![date_value(date)],
        )
    }

    fn streaks_for_code(
        &self,
        code: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<StreakRecord>, StoreError> {
        let (bounds, mut args) = date_bounds(start, end);
        args.insert(0, Value::Text(code.to_string()));
        self.query_streaks(
            &format!("{STREAK_SELECT} WHERE code = ?{bounds} ORDER BY date"),
            args,
        )
    }

    fn latest_streak_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT MAX(date) FROM streak_records", [], |row| {
                row.get::<_, Option<NaiveDate>>(0)
            })?)
    }

    fn create_task(&self, task: &BackfillTask) -> Result<(), StoreError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO backfill_tasks \
             (id, start_date, end_date, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task.id,
                task.start,
                task.end,
                task.status.as_str(),
                task.created_at,
                task.updated_at,
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::DuplicateTask(task.id.clone()));
        }
        Ok(())
    }

    fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE backfill_tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now(), id],
        )?;
        if updated == 0 {
            return Err(StoreError::TaskNotFound(id.to_string()));
        }
        debug!(task_id = id, %status, "task status updated");
        Ok(())
    }

    fn get_task(&self, id: &str) -> Result<Option<BackfillTask>, StoreError> {
        Ok(self
            .conn
            .query_row(&format!("{TASK_SELECT} WHERE id = ?1"), [id], task_from_row)
            .optional()?)
    }

    fn list_tasks(&self) -> Result<Vec<BackfillTask>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{TASK_SELECT} ORDER BY created_at DESC, id"))?;
        let rows = stmt.query_map([], task_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn prune_before(&self, date: NaiveDate) -> Result<PruneReport, StoreError> {
        let cutoff = date_value(date);
        let tx = self.conn.unchecked_transaction()?;
        let bars = tx.execute("DELETE FROM daily_bars WHERE date < ?1", [&cutoff])?;
        let streaks = tx.execute("DELETE FROM streak_records WHERE date < ?1", [&cutoff])?;
        tx.commit()?;
        debug!(%date, bars, streaks, "pruned");
        Ok(PruneReport { bars, streaks })
    }
}
