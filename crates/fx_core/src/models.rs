use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

pub const DEFAULT_API_BASE_URL: &str = "https://api.frankfurter.app";
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TICKER_SIZE: usize = 10;
pub const DEFAULT_FAVORITES: [&str; 5] = ["USD", "EUR", "GBP", "INR", "JPY"];

/// Three-letter uppercase currency identifier, e.g. `USD`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let code = raw.trim().to_ascii_uppercase();
        if code.len() == 3 && code.chars().all(|ch| ch.is_ascii_uppercase()) {
            Ok(Self(code))
        } else {
            Err(ValidationError::InvalidCurrency(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CurrencyCode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

/// Parses user-entered amount text. Rejects empty, non-numeric, zero and
/// negative input.
pub fn parse_amount(raw: &str) -> Result<Decimal, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidAmount);
    }
    let amount = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| ValidationError::InvalidAmount)?;
    ensure_positive(amount)
}

pub fn ensure_positive(amount: Decimal) -> Result<Decimal, ValidationError> {
    if amount > Decimal::ZERO {
        Ok(amount)
    } else {
        Err(ValidationError::InvalidAmount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub amount: Decimal,
    pub source: CurrencyCode,
    pub target: CurrencyCode,
}

impl ConversionRequest {
    pub fn new(
        amount: Decimal,
        source: CurrencyCode,
        target: CurrencyCode,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            amount: ensure_positive(amount)?,
            source,
            target,
        })
    }

    pub fn is_identity(&self) -> bool {
        self.source == self.target
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    pub amount: Decimal,
    pub source: CurrencyCode,
    pub target: CurrencyCode,
    pub converted_amount: Decimal,
    pub effective_rate: Decimal,
    pub as_of_date: NaiveDate,
}

impl ConversionResult {
    /// Builds a result from the provider's total. The amount always comes
    /// from the request, never from the response.
    pub fn from_total(
        request: &ConversionRequest,
        converted_amount: Decimal,
        as_of_date: NaiveDate,
    ) -> Self {
        let effective_rate = converted_amount
            .checked_div(request.amount)
            .unwrap_or(Decimal::ZERO)
            .normalize();
        Self {
            amount: request.amount,
            source: request.source.clone(),
            target: request.target.clone(),
            converted_amount,
            effective_rate,
            as_of_date,
        }
    }

    pub fn identity(request: &ConversionRequest, today: NaiveDate) -> Self {
        Self {
            amount: request.amount,
            source: request.source.clone(),
            target: request.target.clone(),
            converted_amount: request.amount,
            effective_rate: Decimal::ONE,
            as_of_date: today,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: u64,
    pub amount: Decimal,
    pub source: CurrencyCode,
    pub target: CurrencyCode,
    pub converted_amount: Decimal,
    pub effective_rate: Decimal,
    pub recorded_at: String,
}

impl HistoryEntry {
    pub fn request(&self) -> ConversionRequest {
        ConversionRequest {
            amount: self.amount,
            source: self.source.clone(),
            target: self.target.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSnapshot {
    pub base: CurrencyCode,
    pub rates: BTreeMap<CurrencyCode, Decimal>,
    pub as_of_date: Option<NaiveDate>,
    pub fetched_at: DateTime<Utc>,
}

impl RateSnapshot {
    /// Highest `limit` rates, descending. Ties keep code order.
    pub fn top(&self, limit: usize) -> Vec<(CurrencyCode, Decimal)> {
        let mut sorted = self
            .rates
            .iter()
            .map(|(code, rate)| (code.clone(), *rate))
            .collect::<Vec<_>>();
        sorted.sort_by(|(_, a), (_, b)| b.cmp(a));
        sorted.truncate(limit);
        sorted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyPair {
    pub source: CurrencyCode,
    pub target: CurrencyCode,
}

impl CurrencyPair {
    pub fn swapped(&self) -> Self {
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
        }
    }
}

impl Default for CurrencyPair {
    fn default() -> Self {
        Self {
            source: CurrencyCode("USD".to_string()),
            target: CurrencyCode("INR".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularPair {
    pub source: CurrencyCode,
    pub target: CurrencyCode,
    pub label: String,
}

pub fn popular_pairs() -> Vec<PopularPair> {
    [
        ("USD", "EUR"),
        ("EUR", "USD"),
        ("USD", "GBP"),
        ("USD", "INR"),
        ("EUR", "GBP"),
        ("GBP", "INR"),
    ]
    .into_iter()
    .map(|(source, target)| PopularPair {
        source: CurrencyCode(source.to_string()),
        target: CurrencyCode(target.to_string()),
        label: format!("{source} → {target}"),
    })
    .collect()
}

pub fn default_favorites() -> Vec<CurrencyCode> {
    DEFAULT_FAVORITES
        .iter()
        .map(|code| CurrencyCode(code.to_string()))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub platform: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            api_base_url: default_api_base_url(),
            refresh_interval_secs: default_refresh_interval_secs(),
            history_capacity: default_history_capacity(),
            request_timeout_secs: None,
            platform: Some(std::env::consts::OS.to_string()),
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_refresh_interval_secs() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

/// One selectable currency, as offered to the shell's dropdowns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyOption {
    pub code: CurrencyCode,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyOptions {
    pub favorites: Vec<CurrencyOption>,
    pub all: Vec<CurrencyOption>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateTicker {
    pub base: CurrencyCode,
    pub rates: Vec<TickerRate>,
    pub as_of_date: Option<NaiveDate>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerRate {
    pub code: CurrencyCode,
    pub rate: Decimal,
}

impl RateTicker {
    pub fn from_snapshot(snapshot: &RateSnapshot, limit: usize) -> Self {
        Self {
            base: snapshot.base.clone(),
            rates: snapshot
                .top(limit)
                .into_iter()
                .map(|(code, rate)| TickerRate { code, rate })
                .collect(),
            as_of_date: snapshot.as_of_date,
            fetched_at: snapshot.fetched_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapState {
    pub platform: String,
    pub currencies: CurrencyOptions,
    pub favorites: Vec<CurrencyCode>,
    pub pair: CurrencyPair,
    pub amount: String,
    pub last_result: Option<ConversionResult>,
    pub history: Vec<HistoryEntry>,
    pub rates: Option<RateTicker>,
    pub popular_pairs: Vec<PopularPair>,
    pub loading: bool,
}
