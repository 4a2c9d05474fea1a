//! Streak records — the per-day output of the streak engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseError;

/// Shape of the session relative to the limit price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardType {
    /// Closed at the limit with intraday trading, or no limit interaction at all.
    Normal,
    /// Opened, traded and closed at the limit price all session.
    OneWord,
    /// Touched the limit intraday but closed below it.
    Fried,
}

impl BoardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoardType::Normal => "normal",
            BoardType::OneWord => "one_word",
            BoardType::Fried => "fried",
        }
    }
}

impl fmt::Display for BoardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoardType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(BoardType::Normal),
            "one_word" => Ok(BoardType::OneWord),
            "fried" => Ok(BoardType::Fried),
            other => Err(ParseError::UnknownBoardType(other.to_string())),
        }
    }
}

/// Classification and running streak height for one (date, code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRecord {
    pub date: NaiveDate,
    pub code: String,
    pub limit_flag: bool,
    pub streak_height: u32,
    pub fried_flag: bool,
    pub board_type: BoardType,
}

impl StreakRecord {
    /// The record emitted for a bar that breaks or never starts a streak.
    pub fn reset(date: NaiveDate, code: impl Into<String>) -> Self {
        Self {
            date,
            code: code.into(),
            limit_flag: false,
            streak_height: 0,
            fried_flag: false,
            board_type: BoardType::Normal,
        }
    }
}
