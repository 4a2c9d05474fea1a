//! Read-only queries over stored bars and streak records.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

use limitchain_core::domain::{Bar, BoardType, StreakRecord};
use limitchain_core::store::{Storage, StoreError};

/// Moves beyond this fraction of the previous close are reported as abnormal.
pub const ABNORMAL_MOVE: f64 = 0.5;

/// A streak record joined with its bar and instrument name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreakRow {
    pub date: NaiveDate,
    pub code: String,
    pub name: Option<String>,
    pub streak_height: u32,
    pub board_type: BoardType,
    pub limit_flag: bool,
    pub fried_flag: bool,
    pub close: Option<f64>,
    pub prev_close: Option<f64>,
    /// Percent, e.g. `10.0` for a ten percent move.
    pub change_pct: Option<f64>,
}

impl StreakRow {
    pub(crate) fn join(record: StreakRecord, bar: Option<&Bar>, name: Option<String>) -> Self {
        let finite = |v: f64| v.is_finite().then_some(v);
        Self {
            close: bar.and_then(|b| finite(b.close)),
            prev_close: bar.and_then(|b| finite(b.prev_close)),
            change_pct: bar.and_then(Bar::change_pct),
            date: record.date,
            code: record.code,
            name,
            streak_height: record.streak_height,
            board_type: record.board_type,
            limit_flag: record.limit_flag,
            fried_flag: record.fried_flag,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaxStreak {
    pub height: u32,
    /// Earliest date the height was reached.
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbnormalMove {
    pub date: NaiveDate,
    pub code: String,
    pub close: f64,
    pub prev_close: f64,
    pub change_pct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataCheck {
    pub bars: usize,
    pub missing_open: usize,
    pub missing_close: usize,
    pub missing_prev_close: usize,
    /// Largest absolute moves first.
    pub abnormal: Vec<AbnormalMove>,
}

impl DataCheck {
    pub fn is_clean(&self) -> bool {
        self.missing_open == 0
            && self.missing_close == 0
            && self.missing_prev_close == 0
            && self.abnormal.is_empty()
    }
}

fn name_lookup(store: &dyn Storage) -> Result<HashMap<String, String>, StoreError> {
    Ok(store
        .instruments()?
        .into_iter()
        .map(|i| (i.code, i.name))
        .collect())
}

fn join_on(
    store: &dyn Storage,
    date: NaiveDate,
    records: Vec<StreakRecord>,
) -> Result<Vec<StreakRow>, StoreError> {
    let bars: HashMap<String, Bar> = store
        .bars_on(date)?
        .into_iter()
        .map(|b| (b.code.clone(), b))
        .collect();
    let names = name_lookup(store)?;
    Ok(records
        .into_iter()
        .map(|r| {
            let bar = bars.get(&r.code);
            let name = names.get(&r.code).cloned();
            StreakRow::join(r, bar, name)
        })
        .collect())
}

/// Instruments on `date` with a streak of at least `min_height`, highest first.
pub fn high_streaks(
    store: &dyn Storage,
    date: NaiveDate,
    min_height: u32,
) -> Result<Vec<StreakRow>, StoreError> {
    let records = store
        .streaks_on(date)?
        .into_iter()
        .filter(|r| r.streak_height >= min_height.max(1))
        .collect();
    join_on(store, date, records)
}

/// Fried boards on `date`.
pub fn fried_boards(store: &dyn Storage, date: NaiveDate) -> Result<Vec<StreakRow>, StoreError> {
    let mut records: Vec<StreakRecord> = store
        .streaks_on(date)?
        .into_iter()
        .filter(|r| r.fried_flag)
        .collect();
    records.sort_by(|a, b| a.code.cmp(&b.code));
    join_on(store, date, records)
}

/// One instrument's records in date order, joined with its bars.
pub fn streak_history(
    store: &dyn Storage,
    code: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<StreakRow>, StoreError> {
    let records = store.streaks_for_code(code, start, end)?;
    let bars: HashMap<NaiveDate, Bar> = store
        .bars_for_code(code, start, end)?
        .into_iter()
        .map(|b| (b.date, b))
        .collect();
    let name = store.instrument(code)?.map(|i| i.name);
    Ok(records
        .into_iter()
        .map(|r| {
            let bar = bars.get(&r.date);
            StreakRow::join(r, bar, name.clone())
        })
        .collect())
}

/// Highest streak ever recorded for `code`, or `None` when it never closed at the limit.
pub fn max_streak(store: &dyn Storage, code: &str) -> Result<Option<MaxStreak>, StoreError> {
    let best = store
        .streaks_for_code(code, None, None)?
        .into_iter()
        .filter(|r| r.streak_height > 0)
        .fold(None::<MaxStreak>, |best, r| match best {
            Some(b) if b.height >= r.streak_height => Some(b),
            _ => Some(MaxStreak {
                height: r.streak_height,
                date: r.date,
            }),
        });
    Ok(best)
}

/// Missing-price counts and abnormal moves over stored bars in `[start, end]`.
pub fn check_data(
    store: &dyn Storage,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<DataCheck, StoreError> {
    let mut check = DataCheck::default();
    for date in store.bar_dates(start, end)? {
        for bar in store.bars_on(date)? {
            check.bars += 1;
            if bar.open.is_nan() {
                check.missing_open += 1;
            }
            if bar.close.is_nan() {
                check.missing_close += 1;
            }
            if bar.prev_close.is_nan() {
                check.missing_prev_close += 1;
            }
            if let Some(pct) = bar.change_pct() {
                if pct.abs() > ABNORMAL_MOVE * 100.0 {
                    check.abnormal.push(AbnormalMove {
                        date: bar.date,
                        code: bar.code,
                        close: bar.close,
                        prev_close: bar.prev_close,
                        change_pct: pct,
                    });
                }
            }
        }
    }
    check
        .abnormal
        .sort_by(|a, b| b.change_pct.abs().total_cmp(&a.change_pct.abs()));
    Ok(check)
}
