//! Rate governor — bounds outbound fetch calls against a per-run budget.
//!
//! The budget is coarse: it protects an external quota, not a rolling time
//! window. One governor lives for one run and is shared across every batch of
//! that run, so `calls_made` is cumulative.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::provider::{DataError, DataProvider};
use crate::domain::Bar;

/// Governor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GovernorConfig {
    pub enabled: bool,
    pub max_calls: u32,
    /// Pause inserted between consecutive calls.
    pub pause: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_calls: 195,
            pause: Duration::from_millis(500),
        }
    }
}

/// What happened to one instrument inside a governed fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentOutcome {
    Fetched { code: String, rows: usize },
    Skipped { code: String, reason: SkipReason },
}

impl InstrumentOutcome {
    pub fn code(&self) -> &str {
        match self {
            InstrumentOutcome::Fetched { code, .. } | InstrumentOutcome::Skipped { code, .. } => {
                code
            }
        }
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self, InstrumentOutcome::Fetched { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The provider answered with no rows for the range.
    Empty,
    /// Per-instrument provider failure; the batch carries on.
    Provider(String),
    /// An error that would repeat for every call; the rest of the batch was abandoned.
    Fatal(String),
}

/// Rows and bookkeeping from one governed batch fetch.
#[derive(Debug, Default)]
pub struct GovernedFetch {
    pub bars: Vec<Bar>,
    pub outcomes: Vec<InstrumentOutcome>,
    /// Cumulative calls made by the governor after this fetch.
    pub calls_made: u32,
    pub rate_limited: bool,
    pub interrupted: bool,
}

impl GovernedFetch {
    pub fn fetched(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_fetched()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.fetched()
    }

    /// The fatal error that cut this batch short, if any.
    pub fn fatal(&self) -> Option<&str> {
        self.outcomes.iter().find_map(|o| match o {
            InstrumentOutcome::Skipped {
                reason: SkipReason::Fatal(msg),
                ..
            } => Some(msg.as_str()),
            _ => None,
        })
    }
}

/// Sequential call budget for a single run.
#[derive(Debug)]
pub struct RateGovernor {
    config: GovernorConfig,
    calls_made: u32,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            calls_made: 0,
        }
    }

    pub fn calls_made(&self) -> u32 {
        self.calls_made
    }

    /// True once an enabled governor has spent its budget.
    pub fn exhausted(&self) -> bool {
        self.config.enabled && self.calls_made >= self.config.max_calls
    }

    /// Remaining calls, or `None` when the governor is disabled.
    pub fn remaining(&self) -> Option<u32> {
        self.config
            .enabled
            .then(|| self.config.max_calls.saturating_sub(self.calls_made))
    }

    /// Fetch every code in order, one call each, until the budget runs out.
    ///
    /// Results already fetched are kept when the run halts. A provider-side
    /// rate limit halts the same way as an exhausted budget.
    pub fn fetch_batch(
        &mut self,
        provider: &dyn DataProvider,
        codes: &[&str],
        start: NaiveDate,
        end: NaiveDate,
        cancel: Option<&AtomicBool>,
    ) -> GovernedFetch {
        let mut out = GovernedFetch::default();

        for (i, code) in codes.iter().enumerate() {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                out.interrupted = true;
                break;
            }
            if self.exhausted() {
                warn!(
                    calls_made = self.calls_made,
                    max_calls = self.config.max_calls,
                    next_code = %code,
                    "call budget exhausted"
                );
                out.rate_limited = true;
                break;
            }

            if self.calls_made > 0 && !self.config.pause.is_zero() {
                std::thread::sleep(self.config.pause);
            }

            self.calls_made += 1;
            let result = provider.fetch(code, start, end);
            debug!(code = %code, call = self.calls_made, ok = result.is_ok(), "fetch");

            match result {
                Ok(fetch) if fetch.bars.is_empty() => {
                    out.outcomes.push(InstrumentOutcome::Skipped {
                        code: code.to_string(),
                        reason: SkipReason::Empty,
                    });
                }
                Ok(fetch) => {
                    out.outcomes.push(InstrumentOutcome::Fetched {
                        code: code.to_string(),
                        rows: fetch.bars.len(),
                    });
                    out.bars.extend(fetch.bars);
                }
                Err(DataError::RateLimited(msg)) => {
                    warn!(code = %code, %msg, "provider rate limit");
                    out.outcomes.push(InstrumentOutcome::Skipped {
                        code: code.to_string(),
                        reason: SkipReason::Provider(msg),
                    });
                    out.rate_limited = true;
                    break;
                }
                Err(e) if e.is_fatal() => {
                    warn!(code = %code, error = %e, remaining = codes.len() - i - 1, "fatal provider error");
                    out.outcomes.push(InstrumentOutcome::Skipped {
                        code: code.to_string(),
                        reason: SkipReason::Fatal(e.to_string()),
                    });
                    break;
                }
                Err(e) => {
                    warn!(code = %code, error = %e, "skipping instrument");
                    out.outcomes.push(InstrumentOutcome::Skipped {
                        code: code.to_string(),
                        reason: SkipReason::Provider(e.to_string()),
                    });
                }
            }
        }

        out.calls_made = self.calls_made;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{DataSource, FetchResult};
    use std::sync::atomic::AtomicUsize;

    struct CountingProvider {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
        fatal_on: Option<&'static str>,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: None,
                fatal_on: None,
            }
        }
    }

    impl DataProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn fetch(
            &self,
            code: &str,
            start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<FetchResult, DataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(code) {
                return Err(DataError::NetworkUnreachable("reset".into()));
            }
            if self.fatal_on == Some(code) {
                return Err(DataError::AuthenticationRequired("token".into()));
            }
            Ok(FetchResult {
                code: code.to_string(),
                bars: vec![Bar {
                    date: start,
                    code: code.to_string(),
                    open: 10.0,
                    high: 11.0,
                    low: 10.0,
                    close: 11.0,
                    prev_close: 10.0,
                    volume: 1.0,
                    amount: 1.0,
                }],
                source: DataSource::Synthetic,
            })
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()
    }

    fn config(max_calls: u32) -> GovernorConfig {
        GovernorConfig {
            enabled: true,
            max_calls,
            pause: Duration::ZERO,
        }
    }

    const EIGHT: [&str; 8] = [
        "600000", "600001", "600002", "600003", "600004", "600005", "600006", "600007",
    ];

    #[test]
    fn budget_of_five_stops_eight_calls_at_five() {
        let provider = CountingProvider::new();
        let mut governor = RateGovernor::new(config(5));
        let fetch = governor.fetch_batch(&provider, &EIGHT, day(), day(), None);

        assert!(fetch.rate_limited);
        assert_eq!(fetch.calls_made, 5);
        assert_eq!(fetch.fetched(), 5);
        assert_eq!(fetch.bars.len(), 5);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn budget_spans_batches() {
        let provider = CountingProvider::new();
        let mut governor = RateGovernor::new(config(5));

        let first = governor.fetch_batch(&provider, &EIGHT[..3], day(), day(), None);
        assert!(!first.rate_limited);
        assert_eq!(first.calls_made, 3);

        let second = governor.fetch_batch(&provider, &EIGHT[3..], day(), day(), None);
        assert!(second.rate_limited);
        assert_eq!(second.calls_made, 5);
        assert_eq!(second.fetched(), 2);
    }

    #[test]
    fn disabled_governor_never_halts() {
        let provider = CountingProvider::new();
        let mut governor = RateGovernor::new(GovernorConfig {
            enabled: false,
            ..config(1)
        });
        let fetch = governor.fetch_batch(&provider, &EIGHT, day(), day(), None);
        assert!(!fetch.rate_limited);
        assert_eq!(fetch.calls_made, 8);
        assert_eq!(governor.remaining(), None);
    }

    #[test]
    fn failed_calls_count_against_budget() {
        let mut provider = CountingProvider::new();
        provider.fail_on = Some("600001");
        let mut governor = RateGovernor::new(config(3));
        let fetch = governor.fetch_batch(&provider, &EIGHT, day(), day(), None);

        assert_eq!(fetch.calls_made, 3);
        assert_eq!(fetch.fetched(), 2);
        assert_eq!(fetch.skipped(), 1);
        assert!(matches!(
            &fetch.outcomes[1],
            InstrumentOutcome::Skipped { reason: SkipReason::Provider(_), .. }
        ));
    }

    #[test]
    fn fatal_error_abandons_rest_of_batch() {
        let mut provider = CountingProvider::new();
        provider.fatal_on = Some("600002");
        let mut governor = RateGovernor::new(config(100));
        let fetch = governor.fetch_batch(&provider, &EIGHT, day(), day(), None);

        assert_eq!(fetch.calls_made, 3);
        assert!(!fetch.rate_limited);
        assert!(fetch.fatal().is_some());
    }

    #[test]
    fn cancel_flag_stops_before_next_call() {
        let provider = CountingProvider::new();
        let mut governor = RateGovernor::new(config(100));
        let cancel = AtomicBool::new(true);
        let fetch = governor.fetch_batch(&provider, &EIGHT, day(), day(), Some(&cancel));

        assert!(fetch.interrupted);
        assert_eq!(fetch.calls_made, 0);
        assert!(fetch.outcomes.is_empty());
    }
}
