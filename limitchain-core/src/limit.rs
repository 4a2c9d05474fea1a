//! Limit classifier — pure predicates over a single session's prices.
//!
//! A session is limit-up when its close reaches `prev_close * (1 + ratio)`
//! within a fractional tolerance. Exchanges round the cap to the tick, so an
//! exact comparison would miss most real limit-ups.

use serde::{Deserialize, Serialize};

use crate::domain::{Instrument, MarketClass};

/// Default fractional tolerance applied to every limit comparison.
pub const DEFAULT_TOLERANCE: f64 = 0.001;

/// Per-market-class daily limit ratios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitRules {
    pub tolerance: f64,
    pub main: f64,
    pub growth: f64,
    pub tech: f64,
    pub regional: f64,
    /// Reduced cap for special-treatment instruments. Applies to the main board only.
    pub special_treatment: f64,
}

impl Default for LimitRules {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            main: 0.10,
            growth: 0.20,
            tech: 0.20,
            regional: 0.30,
            special_treatment: 0.05,
        }
    }
}

impl LimitRules {
    pub fn ratio_for(&self, class: MarketClass, special_treatment: bool) -> f64 {
        match class {
            MarketClass::Main if special_treatment => self.special_treatment,
            MarketClass::Main => self.main,
            MarketClass::Growth => self.growth,
            MarketClass::Tech => self.tech,
            MarketClass::Regional => self.regional,
        }
    }

    /// The rule the streak engine applies to this instrument.
    pub fn rule_for(&self, instrument: &Instrument) -> LimitRule {
        LimitRule::new(instrument.limit_ratio, self.tolerance)
    }
}

/// Ratio and tolerance resolved for one instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitRule {
    pub ratio: f64,
    pub tolerance: f64,
}

impl LimitRule {
    pub fn new(ratio: f64, tolerance: f64) -> Self {
        Self { ratio, tolerance }
    }
}

/// `prev_close * (1 + ratio)`.
pub fn limit_price(prev_close: f64, ratio: f64) -> f64 {
    prev_close * (1.0 + ratio)
}

fn usable(prev_close: f64, price: f64) -> bool {
    prev_close.is_finite() && prev_close > 0.0 && price.is_finite()
}

/// Close reached the cap within tolerance.
pub fn is_limit_up(close: f64, prev_close: f64, ratio: f64, tolerance: f64) -> bool {
    if !usable(prev_close, close) {
        return false;
    }
    close >= limit_price(prev_close, ratio) * (1.0 - tolerance)
}

/// All four prices sit on the limit price: the session never traded off the cap.
pub fn is_one_word_board(
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    prev_close: f64,
    ratio: f64,
    tolerance: f64,
) -> bool {
    if !usable(prev_close, close) {
        return false;
    }
    let limit = limit_price(prev_close, ratio);
    let band = limit * tolerance;
    [open, high, low, close]
        .iter()
        .all(|p| p.is_finite() && (p - limit).abs() <= band)
}

/// High touched the cap but the close fell back below it.
pub fn is_fried_board(high: f64, close: f64, prev_close: f64, ratio: f64, tolerance: f64) -> bool {
    if !usable(prev_close, close) || !high.is_finite() {
        return false;
    }
    let threshold = limit_price(prev_close, ratio) * (1.0 - tolerance);
    high >= threshold && close < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = DEFAULT_TOLERANCE;

    #[test]
    fn limit_price_is_prev_close_times_one_plus_ratio() {
        assert!((limit_price(10.0, 0.10) - 11.0).abs() < 1e-12);
        assert!((limit_price(20.0, 0.20) - 24.0).abs() < 1e-12);
    }

    #[test]
    fn limit_up_within_tolerance() {
        assert!(is_limit_up(11.0, 10.0, 0.10, EPS));
        // rounded down by one tick still counts
        assert!(is_limit_up(10.99, 10.0, 0.10, EPS));
        assert!(!is_limit_up(10.95, 10.0, 0.10, EPS));
    }

    #[test]
    fn limit_up_rejects_missing_or_zero_prev_close() {
        assert!(!is_limit_up(11.0, 0.0, 0.10, EPS));
        assert!(!is_limit_up(11.0, -1.0, 0.10, EPS));
        assert!(!is_limit_up(11.0, f64::NAN, 0.10, EPS));
        assert!(!is_limit_up(f64::NAN, 10.0, 0.10, EPS));
    }

    #[test]
    fn one_word_board_when_all_prices_on_limit() {
        assert!(is_one_word_board(11.0, 11.0, 11.0, 11.0, 10.0, 0.10, EPS));
    }

    #[test]
    fn high_above_limit_is_not_one_word() {
        assert!(!is_one_word_board(11.0, 11.2, 11.0, 11.0, 10.0, 0.10, EPS));
        assert!(is_limit_up(11.0, 10.0, 0.10, EPS));
    }

    #[test]
    fn low_off_limit_is_not_one_word() {
        assert!(!is_one_word_board(10.5, 11.0, 10.2, 11.0, 10.0, 0.10, EPS));
    }

    #[test]
    fn fried_board_touches_then_falls_back() {
        assert!(is_fried_board(11.0, 10.6, 10.0, 0.10, EPS));
        assert!(!is_fried_board(10.8, 10.6, 10.0, 0.10, EPS));
        // closing on the limit is a limit-up, not fried
        assert!(!is_fried_board(11.0, 11.0, 10.0, 0.10, EPS));
    }

    #[test]
    fn growth_board_uses_twenty_percent() {
        assert!(!is_limit_up(11.0, 10.0, 0.20, EPS));
        assert!(is_limit_up(12.0, 10.0, 0.20, EPS));
    }

    #[test]
    fn rules_resolve_special_treatment_on_main_only() {
        let rules = LimitRules::default();
        assert_eq!(rules.ratio_for(MarketClass::Main, true), 0.05);
        assert_eq!(rules.ratio_for(MarketClass::Main, false), 0.10);
        assert_eq!(rules.ratio_for(MarketClass::Tech, true), 0.20);
        assert_eq!(rules.ratio_for(MarketClass::Regional, false), 0.30);
    }
}
