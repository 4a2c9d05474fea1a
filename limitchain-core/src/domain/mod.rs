//! Domain types for limitchain

pub mod bar;
pub mod instrument;
pub mod streak;
pub mod task;

pub use bar::Bar;
pub use instrument::{is_special_treatment, Instrument, MarketClass};
pub use streak::{BoardType, StreakRecord};
pub use task::{BackfillTask, TaskStatus};

use thiserror::Error;

/// Instrument code type alias
pub type Code = String;

/// Failure to parse a stored enum tag back into its domain type.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unknown market class: {0}")]
    UnknownMarketClass(String),

    #[error("unknown board type: {0}")]
    UnknownBoardType(String),

    #[error("unknown task status: {0}")]
    UnknownTaskStatus(String),
}
