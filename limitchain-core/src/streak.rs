//! Streak engine — a left-to-right fold over one instrument's bars.
//!
//! The engine holds a single counter. Each limit-up session increments it,
//! anything else resets it to zero. Records are a pure function of the bar
//! history, so recomputation always replays from the first bar supplied.

use std::collections::BTreeMap;

use crate::domain::{Bar, BoardType, StreakRecord};
use crate::limit::{is_fried_board, is_limit_up, is_one_word_board, LimitRule};

/// Running streak state for a single instrument.
#[derive(Debug, Default, Clone)]
pub struct StreakEngine {
    counter: u32,
}

impl StreakEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current streak height.
    pub fn height(&self) -> u32 {
        self.counter
    }

    /// Advance by one bar. Bars must arrive in ascending date order.
    pub fn step(&mut self, bar: &Bar, rule: LimitRule) -> StreakRecord {
        if !bar.has_valid_closes() {
            self.counter = 0;
            return StreakRecord::reset(bar.date, bar.code.clone());
        }

        if is_limit_up(bar.close, bar.prev_close, rule.ratio, rule.tolerance) {
            self.counter += 1;
            let board_type = if is_one_word_board(
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.prev_close,
                rule.ratio,
                rule.tolerance,
            ) {
                BoardType::OneWord
            } else {
                BoardType::Normal
            };
            return StreakRecord {
                date: bar.date,
                code: bar.code.clone(),
                limit_flag: true,
                streak_height: self.counter,
                fried_flag: false,
                board_type,
            };
        }

        self.counter = 0;
        let fried = is_fried_board(bar.high, bar.close, bar.prev_close, rule.ratio, rule.tolerance);
        StreakRecord {
            date: bar.date,
            code: bar.code.clone(),
            limit_flag: false,
            streak_height: 0,
            fried_flag: fried,
            board_type: if fried {
                BoardType::Fried
            } else {
                BoardType::Normal
            },
        }
    }
}

/// Replay one instrument's bars from a fresh engine.
///
/// Input order does not matter: bars are sorted by date first, and a repeated
/// date keeps only its first occurrence.
pub fn compute_streaks(bars: &[Bar], rule: LimitRule) -> Vec<StreakRecord> {
    let mut ordered: Vec<&Bar> = bars.iter().collect();
    ordered.sort_by_key(|b| b.date);
    ordered.dedup_by_key(|b| b.date);

    let mut engine = StreakEngine::new();
    ordered.into_iter().map(|bar| engine.step(bar, rule)).collect()
}

/// Split a mixed batch of bars into per-code histories.
pub fn group_by_code(bars: &[Bar]) -> BTreeMap<String, Vec<Bar>> {
    let mut grouped: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
    for bar in bars {
        grouped.entry(bar.code.clone()).or_default().push(bar.clone());
    }
    grouped
}
