//! Data provider traits and structured error types.
//!
//! `DataProvider` abstracts over bar sources (Tushare, CSV import) and
//! `UniverseProvider` over instrument lists, so the pipeline can swap
//! implementations and tests can script them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::schema::SchemaError;
use crate::domain::{Bar, Instrument};

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("no data for code: {code}")]
    SymbolNotFound { code: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Errors that will repeat for every remaining call, so the batch stops early.
    ///
    /// A missing response column is fatal; a bad cell (`InvalidDate`) only
    /// affects the instrument it came from.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DataError::AuthenticationRequired(_)
                | DataError::Schema(SchemaError::MissingField { .. })
        )
    }
}

impl From<std::io::Error> for DataError {
    fn from(e: std::io::Error) -> Self {
        DataError::Io(e.to_string())
    }
}

/// Result of a successful data fetch for a single instrument.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub code: String,
    pub bars: Vec<Bar>,
    pub source: DataSource,
}

/// Where the data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    Tushare,
    CsvImport,
    Increment,
    Synthetic,
}

/// Trait for bar providers.
///
/// One `fetch` is one outbound call. Rate budgeting happens above this trait,
/// in the governor; providers only retry transient transport failures.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily bars for one instrument over an inclusive date range.
    ///
    /// An empty `bars` vector is a valid answer (suspended or not yet listed).
    fn fetch(&self, code: &str, start: NaiveDate, end: NaiveDate)
        -> Result<FetchResult, DataError>;

    /// Check if the provider is currently usable (credentials present, source reachable).
    fn is_available(&self) -> bool;
}

/// Source of the instrument universe.
///
/// Implementations resolve market class, special-treatment flag and limit
/// ratio before returning.
pub trait UniverseProvider: Send + Sync {
    fn instruments(&self) -> Result<Vec<Instrument>, DataError>;
}
