//! CSV import provider.
//!
//! Reads `{dir}/{code}.csv`, one file per instrument. Files without a
//! previous-close column get it derived from the prior row's close, and the
//! first row (which has no prior) is dropped.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

use super::provider::{DataError, DataProvider, DataSource, FetchResult};
use super::schema::{columns, parse_date, parse_price, FieldMap};
use crate::domain::Bar;

/// Offline provider reading per-instrument CSV files.
pub struct CsvProvider {
    dir: PathBuf,
    fields: FieldMap,
}

impl CsvProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fields: FieldMap::csv_bars(),
        }
    }

    fn path_for(&self, code: &str) -> PathBuf {
        self.dir.join(format!("{code}.csv"))
    }

    /// Parse one file into ascending bars over its full history.
    pub fn read_file(&self, path: &Path, code: &str) -> Result<Vec<Bar>, DataError> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| DataError::Io(format!("{}: {e}", path.display())))?;
        let header: Vec<String> = reader
            .headers()
            .map_err(|e| DataError::ResponseFormatChanged(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        // Each file carries its own header, so a missing column only sinks this file.
        let resolved = self
            .fields
            .resolve(&header)
            .map_err(|e| DataError::ResponseFormatChanged(format!("{}: {e}", path.display())))?;

        let get = |record: &csv::StringRecord, field: &str| -> f64 {
            resolved
                .index(field)
                .and_then(|i| record.get(i))
                .map(parse_price)
                .unwrap_or(f64::NAN)
        };

        let mut bars = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| DataError::ResponseFormatChanged(e.to_string()))?;
            let Some(raw_date) = resolved.index(columns::DATE).and_then(|i| record.get(i)) else {
                continue;
            };
            if raw_date.trim().is_empty() {
                continue;
            }
            bars.push(Bar {
                date: parse_date(self.fields.provider(), raw_date)?,
                code: code.to_string(),
                open: get(&record, columns::OPEN),
                high: get(&record, columns::HIGH),
                low: get(&record, columns::LOW),
                close: get(&record, columns::CLOSE),
                prev_close: get(&record, columns::PREV_CLOSE),
                volume: get(&record, columns::VOLUME),
                amount: get(&record, columns::AMOUNT),
            });
        }

        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);

        if !resolved.has(columns::PREV_CLOSE) {
            derive_prev_close(&mut bars);
        }
        Ok(bars)
    }
}

/// Fill previous close from the prior row and drop the first row.
fn derive_prev_close(bars: &mut Vec<Bar>) {
    for i in (1..bars.len()).rev() {
        bars[i].prev_close = bars[i - 1].close;
    }
    if !bars.is_empty() {
        bars.remove(0);
    }
}

impl DataProvider for CsvProvider {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        let path = self.path_for(code);
        if !path.exists() {
            return Err(DataError::SymbolNotFound {
                code: code.to_string(),
            });
        }
        let bars = self
            .read_file(&path, code)?
            .into_iter()
            .filter(|b| b.date >= start && b.date <= end)
            .collect();
        Ok(FetchResult {
            code: code.to_string(),
            bars,
            source: DataSource::CsvImport,
        })
    }

    fn is_available(&self) -> bool {
        self.dir.is_dir()
    }
}
