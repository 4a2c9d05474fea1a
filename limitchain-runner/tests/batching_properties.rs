//! Property tests: batch boundaries and replays never change what is stored.

use chrono::NaiveDate;
use proptest::prelude::*;
use std::collections::HashMap;

use limitchain_core::data::{
    DataError, DataProvider, DataSource, FetchResult, StaticUniverse, UniverseEntry,
};
use limitchain_core::domain::{Bar, StreakRecord};
use limitchain_core::limit::LimitRules;
use limitchain_core::store::{SqliteStore, Storage};
use limitchain_runner::{BackfillManager, RunContext, SilentProgress, TrackerConfig};

struct FixedProvider {
    bars: HashMap<String, Vec<Bar>>,
}

impl DataProvider for FixedProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    fn fetch(&self, code: &str, _start: NaiveDate, _end: NaiveDate) -> Result<FetchResult, DataError> {
        Ok(FetchResult {
            code: code.to_string(),
            bars: self.bars.get(code).cloned().unwrap_or_default(),
            source: DataSource::Synthetic,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 10, day).unwrap()
}

/// Per-day moves in percent; 10 is a limit-up on the main board.
fn history(code: &str, moves: &[u8]) -> Vec<Bar> {
    let mut prev = 10.0_f64;
    moves
        .iter()
        .enumerate()
        .map(|(i, &m)| {
            let close = prev * (1.0 + f64::from(m) / 100.0);
            let bar = Bar {
                date: d(i as u32 + 1),
                code: code.to_string(),
                open: prev,
                high: close,
                low: prev,
                close,
                prev_close: prev,
                volume: 1.0,
                amount: close,
            };
            prev = close;
            bar
        })
        .collect()
}

fn run(histories: &[Vec<u8>], batch_size: usize, passes: usize) -> Vec<StreakRecord> {
    let codes: Vec<String> = (0..histories.len()).map(|i| format!("6000{i:02}")).collect();
    let provider = FixedProvider {
        bars: codes
            .iter()
            .zip(histories)
            .map(|(c, h)| (c.clone(), history(c, h)))
            .collect(),
    };
    let universe = StaticUniverse::new(
        codes
            .iter()
            .map(|c| UniverseEntry {
                code: c.clone(),
                name: String::new(),
            })
            .collect(),
        LimitRules::default(),
    );
    let mut config = TrackerConfig::default();
    config.ingest.batch_size = batch_size;
    config.rate_limit.pause_ms = 0;
    let store = SqliteStore::open_in_memory().unwrap();

    for _ in 0..passes {
        let ctx = RunContext {
            config: &config,
            store: &store,
            provider: &provider,
            universe: &universe,
            progress: &SilentProgress,
        };
        BackfillManager::new(ctx).start(d(1), d(28), None).unwrap();
    }

    codes
        .iter()
        .flat_map(|c| store.streaks_for_code(c, None, None).unwrap())
        .collect()
}

fn move_strategy() -> impl Strategy<Value = u8> {
    prop_oneof![Just(10u8), 0u8..9]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn batch_size_does_not_change_records(
        histories in prop::collection::vec(prop::collection::vec(move_strategy(), 1..12), 1..7),
        batch_size in 1usize..5,
    ) {
        let one_batch = run(&histories, histories.len(), 1);
        let batched = run(&histories, batch_size, 1);
        prop_assert_eq!(one_batch, batched);
    }

    #[test]
    fn repeated_backfills_store_the_same_records(
        histories in prop::collection::vec(prop::collection::vec(move_strategy(), 1..12), 1..5),
    ) {
        let once = run(&histories, 2, 1);
        let thrice = run(&histories, 2, 3);
        prop_assert_eq!(once, thrice);
    }
}
