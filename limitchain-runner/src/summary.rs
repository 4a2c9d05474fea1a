//! Daily market summary over stored streak records.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use limitchain_core::domain::{BoardType, StreakRecord};
use limitchain_core::store::{Storage, StoreError};

/// Streaks at or above this height are listed individually.
pub const TOP_STREAK_MIN_HEIGHT: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopStreak {
    pub code: String,
    pub name: Option<String>,
    pub height: u32,
    pub board_type: BoardType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub instruments: usize,
    pub limit_up_count: usize,
    pub one_word_count: usize,
    pub fried_count: usize,
    /// Streak height → number of instruments at that height (heights ≥ 1).
    pub height_distribution: BTreeMap<u32, usize>,
    /// Highest first.
    pub top_streaks: Vec<TopStreak>,
}

impl DailySummary {
    /// Aggregate one date's records. `name_of` resolves display names.
    pub fn from_records<F>(date: NaiveDate, records: &[StreakRecord], name_of: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut summary = DailySummary {
            date,
            instruments: 0,
            limit_up_count: 0,
            one_word_count: 0,
            fried_count: 0,
            height_distribution: BTreeMap::new(),
            top_streaks: Vec::new(),
        };

        for r in records.iter().filter(|r| r.date == date) {
            summary.instruments += 1;
            if r.limit_flag {
                summary.limit_up_count += 1;
                if r.board_type == BoardType::OneWord {
                    summary.one_word_count += 1;
                }
            }
            if r.fried_flag {
                summary.fried_count += 1;
            }
            if r.streak_height > 0 {
                *summary.height_distribution.entry(r.streak_height).or_default() += 1;
            }
            if r.streak_height >= TOP_STREAK_MIN_HEIGHT {
                summary.top_streaks.push(TopStreak {
                    code: r.code.clone(),
                    name: name_of(&r.code),
                    height: r.streak_height,
                    board_type: r.board_type,
                });
            }
        }

        summary
            .top_streaks
            .sort_by(|a, b| b.height.cmp(&a.height).then_with(|| a.code.cmp(&b.code)));
        summary
    }

    pub fn highest(&self) -> u32 {
        self.height_distribution.keys().next_back().copied().unwrap_or(0)
    }
}

impl fmt::Display for DailySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Summary for {}", self.date)?;
        writeln!(f, "  instruments with records: {}", self.instruments)?;
        writeln!(f, "  limit-up:                 {}", self.limit_up_count)?;
        writeln!(f, "  one-word boards:          {}", self.one_word_count)?;
        writeln!(f, "  fried boards:             {}", self.fried_count)?;
        if self.height_distribution.is_empty() {
            writeln!(f, "  no active streaks")?;
        } else {
            writeln!(f, "  height distribution:")?;
            for (height, count) in &self.height_distribution {
                writeln!(f, "    {height:>3} boards: {count}")?;
            }
        }
        for top in &self.top_streaks {
            writeln!(
                f,
                "  {:>3}  {} {} ({})",
                top.height,
                top.code,
                top.name.as_deref().unwrap_or("-"),
                top.board_type
            )?;
        }
        Ok(())
    }
}

/// Summary for `date` read from storage.
pub fn daily_summary(store: &dyn Storage, date: NaiveDate) -> Result<DailySummary, StoreError> {
    let records = store.streaks_on(date)?;
    let names: BTreeMap<String, String> = store
        .instruments()?
        .into_iter()
        .map(|i| (i.code, i.name))
        .collect();
    Ok(DailySummary::from_records(date, &records, |code| {
        names.get(code).cloned()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 3).unwrap()
    }

    fn rec(code: &str, limit: bool, height: u32, fried: bool, board: BoardType) -> StreakRecord {
        StreakRecord {
            date: d(),
            code: code.into(),
            limit_flag: limit,
            streak_height: height,
            fried_flag: fried,
            board_type: board,
        }
    }

    #[test]
    fn counts_and_distribution() {
        let records = vec![
            rec("600001", true, 1, false, BoardType::Normal),
            rec("600002", true, 3, false, BoardType::OneWord),
            rec("600003", true, 4, false, BoardType::Normal),
            rec("600004", false, 0, true, BoardType::Fried),
            rec("600005", false, 0, false, BoardType::Normal),
        ];
        let s = DailySummary::from_records(d(), &records, |c| {
            (c == "600003").then(|| "Alpha".to_string())
        });

        assert_eq!(s.instruments, 5);
        assert_eq!(s.limit_up_count, 3);
        assert_eq!(s.one_word_count, 1);
        assert_eq!(s.fried_count, 1);
        assert_eq!(s.height_distribution.get(&1), Some(&1));
        assert_eq!(s.height_distribution.get(&3), Some(&1));
        assert_eq!(s.height_distribution.get(&4), Some(&1));
        assert!(!s.height_distribution.contains_key(&0));
        assert_eq!(s.highest(), 4);

        let tops: Vec<(&str, u32)> = s.top_streaks.iter().map(|t| (t.code.as_str(), t.height)).collect();
        assert_eq!(tops, vec![("600003", 4), ("600002", 3)]);
        assert_eq!(s.top_streaks[0].name.as_deref(), Some("Alpha"));
    }

    #[test]
    fn other_dates_ignored() {
        let mut other = rec("000001", true, 2, false, BoardType::Normal);
        other.date = NaiveDate::from_ymd_opt(2025, 11, 4).unwrap();
        let s = DailySummary::from_records(d(), &[other], |_| None);
        assert_eq!(s.instruments, 0);
        assert_eq!(s.highest(), 0);
        assert!(s.to_string().contains("no active streaks"));
    }
}
