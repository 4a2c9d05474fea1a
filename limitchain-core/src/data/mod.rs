//! Data providers, field mapping and the rate governor

pub mod csv_source;
pub mod governor;
pub mod provider;
pub mod schema;
pub mod tushare;
pub mod universe;

pub use csv_source::CsvProvider;
pub use governor::{GovernedFetch, GovernorConfig, InstrumentOutcome, RateGovernor, SkipReason};
pub use provider::{DataError, DataProvider, DataSource, FetchResult, UniverseProvider};
pub use schema::{FieldMap, SchemaError};
pub use tushare::{TushareConfig, TushareProvider};
pub use universe::{StaticUniverse, UniverseEntry};
