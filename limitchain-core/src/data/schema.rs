//! Field mapping between provider columns and canonical bar columns.
//!
//! Each provider declares a `FieldMap` once. It is resolved against the
//! header of every response, and a missing required column fails with
//! `SchemaError::MissingField` instead of being silently dropped.

use chrono::NaiveDate;
use thiserror::Error;

/// Canonical column names.
pub mod columns {
    pub const CODE: &str = "code";
    pub const NAME: &str = "name";
    pub const DATE: &str = "date";
    pub const OPEN: &str = "open";
    pub const HIGH: &str = "high";
    pub const LOW: &str = "low";
    pub const CLOSE: &str = "close";
    pub const PREV_CLOSE: &str = "prev_close";
    pub const VOLUME: &str = "volume";
    pub const AMOUNT: &str = "amount";
}

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("{provider}: missing required field '{field}'")]
    MissingField { provider: String, field: String },

    #[error("{provider}: unparseable date '{value}'")]
    InvalidDate { provider: String, value: String },
}

#[derive(Debug, Clone)]
struct FieldEntry {
    canonical: &'static str,
    source: &'static str,
    required: bool,
}

/// Provider column → canonical column table.
#[derive(Debug, Clone)]
pub struct FieldMap {
    provider: &'static str,
    entries: Vec<FieldEntry>,
}

impl FieldMap {
    pub fn new(provider: &'static str) -> Self {
        Self {
            provider,
            entries: Vec::new(),
        }
    }

    pub fn required(mut self, canonical: &'static str, source: &'static str) -> Self {
        self.entries.push(FieldEntry {
            canonical,
            source,
            required: true,
        });
        self
    }

    pub fn optional(mut self, canonical: &'static str, source: &'static str) -> Self {
        self.entries.push(FieldEntry {
            canonical,
            source,
            required: false,
        });
        self
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// Provider column names in declaration order, for request field lists.
    pub fn source_fields(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.source).collect()
    }

    /// Tushare `daily` endpoint.
    pub fn tushare_daily() -> Self {
        use columns::*;
        Self::new("tushare")
            .required(CODE, "ts_code")
            .required(DATE, "trade_date")
            .required(OPEN, "open")
            .required(HIGH, "high")
            .required(LOW, "low")
            .required(CLOSE, "close")
            .required(PREV_CLOSE, "pre_close")
            .optional(VOLUME, "vol")
            .optional(AMOUNT, "amount")
    }

    /// Tushare `stock_basic` endpoint.
    pub fn tushare_stock_basic() -> Self {
        Self::new("tushare")
            .required(columns::CODE, "ts_code")
            .required(columns::NAME, "name")
    }

    /// Per-instrument CSV files. Previous close is optional and derived when absent.
    pub fn csv_bars() -> Self {
        use columns::*;
        Self::new("csv")
            .required(DATE, "date")
            .required(OPEN, "open")
            .required(HIGH, "high")
            .required(LOW, "low")
            .required(CLOSE, "close")
            .optional(PREV_CLOSE, "pre_close")
            .optional(VOLUME, "volume")
            .optional(AMOUNT, "amount")
    }

    /// Locate every mapped column in a response header.
    pub fn resolve<S: AsRef<str>>(&self, header: &[S]) -> Result<ResolvedFields, SchemaError> {
        let mut indices = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let position = header
                .iter()
                .position(|h| h.as_ref().trim().eq_ignore_ascii_case(entry.source));
            if position.is_none() && entry.required {
                return Err(SchemaError::MissingField {
                    provider: self.provider.to_string(),
                    field: entry.source.to_string(),
                });
            }
            indices.push((entry.canonical, position));
        }
        Ok(ResolvedFields {
            provider: self.provider,
            indices,
        })
    }
}

/// A `FieldMap` bound to one concrete header.
#[derive(Debug, Clone)]
pub struct ResolvedFields {
    provider: &'static str,
    indices: Vec<(&'static str, Option<usize>)>,
}

impl ResolvedFields {
    /// Column index for a canonical field, if present in the header.
    pub fn index(&self, canonical: &str) -> Option<usize> {
        self.indices
            .iter()
            .find(|(name, _)| *name == canonical)
            .and_then(|(_, idx)| *idx)
    }

    pub fn has(&self, canonical: &str) -> bool {
        self.index(canonical).is_some()
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }
}

/// Parse `YYYYMMDD` or `YYYY-MM-DD`.
pub fn parse_date(provider: &str, value: &str) -> Result<NaiveDate, SchemaError> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .map_err(|_| SchemaError::InvalidDate {
            provider: provider.to_string(),
            value: trimmed.to_string(),
        })
}

/// Parse a price cell; blanks and junk become NaN.
pub fn parse_price(value: &str) -> f64 {
    value.trim().parse::<f64>().unwrap_or(f64::NAN)
}
