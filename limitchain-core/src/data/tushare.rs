//! Tushare Pro data provider.
//!
//! Posts `{api_name, token, params, fields}` to the HTTP API and decodes the
//! `{fields, items}` table through a `FieldMap`. Transport failures are
//! retried with exponential backoff; quota errors are surfaced as
//! `DataError::RateLimited` so the governor can halt the run.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::provider::{DataError, DataProvider, DataSource, FetchResult, UniverseProvider};
use super::schema::{columns, parse_date, FieldMap, ResolvedFields};
use crate::domain::{Bar, Instrument};
use crate::limit::LimitRules;

/// Provider-side "too many calls per minute".
const CODE_RATE_LIMITED: i64 = 40203;
/// Invalid or missing token.
const CODE_TOKEN_INVALID: i64 = 40101;
/// Insufficient points for the endpoint.
const CODE_PERMISSION_DENIED: i64 = 40001;

/// Connection settings for `TushareProvider`.
#[derive(Debug, Clone)]
pub struct TushareConfig {
    pub token: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for TushareConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: "http://api.tushare.pro".into(),
            timeout: Duration::from_secs(30),
            max_attempts: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Table>,
}

/// Column-major header plus row-major items, as returned by the API.
#[derive(Debug, Deserialize, Default)]
pub struct Table {
    pub fields: Vec<String>,
    #[serde(default)]
    pub items: Vec<Vec<Value>>,
}

/// Tushare Pro provider for daily bars and the listed-instrument universe.
pub struct TushareProvider {
    client: reqwest::blocking::Client,
    config: TushareConfig,
    rules: LimitRules,
    daily_fields: FieldMap,
}

impl TushareProvider {
    pub fn new(config: TushareConfig, rules: LimitRules) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            rules,
            daily_fields: FieldMap::tushare_daily(),
        })
    }

    /// One API call with retry on transport errors.
    fn call(&self, api_name: &str, params: Value, fields: &[&str]) -> Result<Table, DataError> {
        if self.config.token.is_empty() {
            return Err(DataError::AuthenticationRequired(
                "tushare token is not configured".into(),
            ));
        }

        let body = json!({
            "api_name": api_name,
            "token": self.config.token,
            "params": params,
            "fields": fields.join(","),
        });

        let attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                std::thread::sleep(backoff_delay(self.config.base_delay, attempt));
            }

            let resp = match self.client.post(&self.config.base_url).json(&body).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(DataError::RateLimited(format!("HTTP {status}")));
            }
            if !status.is_success() {
                last_error = Some(DataError::Other(format!("HTTP {status} for {api_name}")));
                continue;
            }

            let parsed: ApiResponse = resp.json().map_err(|e| {
                DataError::ResponseFormatChanged(format!("failed to parse {api_name} response: {e}"))
            })?;
            return decode_envelope(api_name, parsed);
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }
}

/// `base * 2^(attempt - 1)`, saturating instead of overflowing.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

fn decode_envelope(api_name: &str, resp: ApiResponse) -> Result<Table, DataError> {
    let msg = resp.msg.unwrap_or_default();
    match resp.code {
        0 => Ok(resp.data.unwrap_or_default()),
        CODE_RATE_LIMITED => Err(DataError::RateLimited(format!("{api_name}: {msg}"))),
        CODE_TOKEN_INVALID | CODE_PERMISSION_DENIED => {
            Err(DataError::AuthenticationRequired(format!("{api_name}: {msg}")))
        }
        code => Err(DataError::Other(format!("{api_name} returned {code}: {msg}"))),
    }
}

/// Exchange-suffixed code expected by the API.
pub fn ts_code(code: &str) -> String {
    let suffix = if code.starts_with('6') {
        "SH"
    } else if code.starts_with("92") || code.starts_with('8') || code.starts_with('4') {
        "BJ"
    } else {
        "SZ"
    };
    format!("{code}.{suffix}")
}

/// Bare six-digit code from `600000.SH`.
pub fn strip_suffix(ts_code: &str) -> &str {
    ts_code.split('.').next().unwrap_or(ts_code)
}

fn cell_str(row: &[Value], idx: Option<usize>) -> Option<String> {
    match idx.and_then(|i| row.get(i))? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn cell_f64(row: &[Value], idx: Option<usize>) -> f64 {
    match idx.and_then(|i| row.get(i)) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Decode a `daily` table into bars for `code`. Rows come newest-first; output is ascending.
pub fn decode_daily(table: &Table, fields: &FieldMap, code: &str) -> Result<Vec<Bar>, DataError> {
    let resolved: ResolvedFields = fields.resolve(&table.fields)?;
    let mut bars = Vec::with_capacity(table.items.len());

    for row in &table.items {
        let Some(raw_date) = cell_str(row, resolved.index(columns::DATE)) else {
            continue;
        };
        let date = parse_date(fields.provider(), &raw_date)?;
        bars.push(Bar {
            date,
            code: code.to_string(),
            open: cell_f64(row, resolved.index(columns::OPEN)),
            high: cell_f64(row, resolved.index(columns::HIGH)),
            low: cell_f64(row, resolved.index(columns::LOW)),
            close: cell_f64(row, resolved.index(columns::CLOSE)),
            prev_close: cell_f64(row, resolved.index(columns::PREV_CLOSE)),
            volume: cell_f64(row, resolved.index(columns::VOLUME)),
            amount: cell_f64(row, resolved.index(columns::AMOUNT)),
        });
    }

    bars.sort_by_key(|b| b.date);
    Ok(bars)
}

/// Decode a `stock_basic` table into classified instruments.
pub fn decode_stock_basic(table: &Table, rules: &LimitRules) -> Result<Vec<Instrument>, DataError> {
    let resolved = FieldMap::tushare_stock_basic().resolve(&table.fields)?;
    Ok(table
        .items
        .iter()
        .filter_map(|row| {
            let code = cell_str(row, resolved.index(columns::CODE))?;
            let name = cell_str(row, resolved.index(columns::NAME)).unwrap_or_default();
            Some(Instrument::classify(strip_suffix(&code), name, rules))
        })
        .collect())
}

impl DataProvider for TushareProvider {
    fn name(&self) -> &str {
        "tushare"
    }

    fn fetch(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        let params = json!({
            "ts_code": ts_code(code),
            "start_date": start.format("%Y%m%d").to_string(),
            "end_date": end.format("%Y%m%d").to_string(),
        });
        let table = self.call("daily", params, &self.daily_fields.source_fields())?;
        let bars = decode_daily(&table, &self.daily_fields, code)?;
        debug!(code, rows = bars.len(), "tushare daily");
        Ok(FetchResult {
            code: code.to_string(),
            bars,
            source: DataSource::Tushare,
        })
    }

    fn is_available(&self) -> bool {
        !self.config.token.is_empty()
    }
}

impl UniverseProvider for TushareProvider {
    fn instruments(&self) -> Result<Vec<Instrument>, DataError> {
        let params = json!({ "exchange": "", "list_status": "L" });
        let table = self.call(
            "stock_basic",
            params,
            &FieldMap::tushare_stock_basic().source_fields(),
        )?;
        let instruments = decode_stock_basic(&table, &self.rules)?;
        debug!(count = instruments.len(), "tushare stock_basic");
        Ok(instruments)
    }
}
