//! Bar — one instrument's daily session.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily OHLC bar with the exchange's previous close.
///
/// Missing prices are carried as NaN rather than dropped, so the streak
/// engine can see the gap and reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub code: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub prev_close: f64,
    pub volume: f64,
    pub amount: f64,
}

impl Bar {
    /// True when close and previous close are both usable for classification.
    pub fn has_valid_closes(&self) -> bool {
        self.close.is_finite() && self.prev_close.is_finite() && self.prev_close > 0.0
    }

    /// Session change in percent against the previous close.
    pub fn change_pct(&self) -> Option<f64> {
        if self.has_valid_closes() {
            Some((self.close - self.prev_close) * 100.0 / self.prev_close)
        } else {
            None
        }
    }

    /// Any of the four session prices missing.
    pub fn has_missing_prices(&self) -> bool {
        !(self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite())
    }
}
