//! Built-in checks of the classifier and streak engine, plus replay
//! verification of stored records.

use chrono::NaiveDate;
use std::fmt;

use limitchain_core::domain::{Bar, BoardType, StreakRecord};
use limitchain_core::limit::{LimitRule, LimitRules, DEFAULT_TOLERANCE};
use limitchain_core::store::{Storage, StoreError};
use limitchain_core::streak::compute_streaks;

/// (close, previous close) for seven consecutive sessions at a 10% limit.
pub const SEVEN_DAY_SEQUENCE: [(f64, f64); 7] = [
    (11.0, 10.0),
    (12.1, 11.0),
    (13.31, 12.1),
    (13.2, 13.31),
    (14.3, 13.0),
    (15.73, 14.3),
    (16.0, 15.73),
];

pub const SEVEN_DAY_HEIGHTS: [u32; 7] = [1, 2, 3, 0, 1, 2, 0];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "[{mark}] {}: {}", self.name, self.detail)
    }
}

fn session(day: u32, open: f64, high: f64, low: f64, close: f64, prev_close: f64) -> Bar {
    Bar {
        date: NaiveDate::from_ymd_opt(2025, 10, 1)
            .and_then(|d| d.checked_add_days(chrono::Days::new(u64::from(day))))
            .unwrap_or_default(),
        code: "SELFTEST".into(),
        open,
        high,
        low,
        close,
        prev_close,
        volume: 1.0,
        amount: 1.0,
    }
}

fn seven_day_bars() -> Vec<Bar> {
    SEVEN_DAY_SEQUENCE
        .iter()
        .zip(0u32..)
        .map(|(&(c, p), day)| session(day, p, c.max(p), c.min(p), c, p))
        .collect()
}

fn heights(records: &[StreakRecord]) -> Vec<u32> {
    records.iter().map(|r| r.streak_height).collect()
}

/// Run every built-in check. All must pass on a correct build.
pub fn run_selftest() -> Vec<Check> {
    let rule = LimitRule::new(0.10, DEFAULT_TOLERANCE);
    let mut checks = Vec::new();

    let bars = seven_day_bars();
    let first = heights(&compute_streaks(&bars, rule));
    checks.push(Check {
        name: "seven-day streak heights",
        passed: first == SEVEN_DAY_HEIGHTS,
        detail: format!("expected {SEVEN_DAY_HEIGHTS:?}, got {first:?}"),
    });

    let second = heights(&compute_streaks(&bars, rule));
    checks.push(Check {
        name: "replay determinism",
        passed: first == second,
        detail: format!("second replay {second:?}"),
    });

    let one_word = compute_streaks(&[session(0, 11.0, 11.0, 11.0, 11.0, 10.0)], rule);
    let board = one_word.first().map(|r| r.board_type);
    checks.push(Check {
        name: "one-word board",
        passed: board == Some(BoardType::OneWord),
        detail: format!("board type {board:?}"),
    });

    let fried = compute_streaks(&[session(0, 10.0, 11.0, 10.0, 10.5, 10.0)], rule);
    let fried_ok = fried
        .first()
        .is_some_and(|r| r.fried_flag && !r.limit_flag && r.streak_height == 0);
    checks.push(Check {
        name: "fried board",
        passed: fried_ok,
        detail: format!("record {:?}", fried.first()),
    });

    checks
}

/// A stored record that disagrees with a full replay of stored bars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub date: NaiveDate,
    pub stored: StreakRecord,
    pub replayed: StreakRecord,
}

/// Replay `code`'s stored bars and compare against its stored records.
///
/// Records written by recent-window runs start counting at the window start,
/// so they can legitimately differ from a full-history replay.
pub fn verify_stored(
    store: &dyn Storage,
    rules: &LimitRules,
    code: &str,
) -> Result<Vec<Mismatch>, StoreError> {
    let Some(instrument) = store.instrument(code)? else {
        return Ok(Vec::new());
    };
    let replayed = compute_streaks(&store.bars_for_code(code, None, None)?, rules.rule_for(&instrument));
    let stored = store.streaks_for_code(code, None, None)?;

    Ok(stored
        .into_iter()
        .filter_map(|s| {
            let r = replayed.iter().find(|r| r.date == s.date)?;
            (r != &s).then(|| Mismatch {
                date: s.date,
                replayed: r.clone(),
                stored: s,
            })
        })
        .collect())
}
