use std::{collections::BTreeMap, str::FromStr};

use rust_decimal::Decimal;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::{CurrencyCode, HistoryEntry};

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

pub const KEY_FAVORITES: &str = "favorites";
pub const KEY_HISTORY: &str = "history";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub entries: BTreeMap<String, Value>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// On-disk shape of a history entry. Decimals are written as strings so a
/// reload yields exactly the values that were saved. Number-valued and
/// `from`/`to`/`result`/`rate`/`date` entries from older stores still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredHistoryEntry {
    pub id: u64,
    #[serde(
        serialize_with = "rust_decimal::serde::str::serialize",
        deserialize_with = "decimal_from_text_or_number"
    )]
    pub amount: Decimal,
    #[serde(alias = "from")]
    pub source: CurrencyCode,
    #[serde(alias = "to")]
    pub target: CurrencyCode,
    #[serde(
        alias = "result",
        serialize_with = "rust_decimal::serde::str::serialize",
        deserialize_with = "decimal_from_text_or_number"
    )]
    pub converted_amount: Decimal,
    #[serde(
        alias = "rate",
        serialize_with = "rust_decimal::serde::str::serialize",
        deserialize_with = "decimal_from_text_or_number"
    )]
    pub effective_rate: Decimal,
    #[serde(alias = "date")]
    pub recorded_at: String,
}

impl From<&HistoryEntry> for StoredHistoryEntry {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            id: entry.id,
            amount: entry.amount,
            source: entry.source.clone(),
            target: entry.target.clone(),
            converted_amount: entry.converted_amount,
            effective_rate: entry.effective_rate,
            recorded_at: entry.recorded_at.clone(),
        }
    }
}

impl From<StoredHistoryEntry> for HistoryEntry {
    fn from(stored: StoredHistoryEntry) -> Self {
        Self {
            id: stored.id,
            amount: stored.amount,
            source: stored.source,
            target: stored.target,
            converted_amount: stored.converted_amount,
            effective_rate: stored.effective_rate,
            recorded_at: stored.recorded_at,
        }
    }
}

fn decimal_from_text_or_number<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    let text = match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    #[test]
    fn decimals_are_written_as_exact_text() {
        let entry = StoredHistoryEntry {
            id: 1,
            amount: dec!(3),
            source: CurrencyCode::parse("USD").unwrap(),
            target: CurrencyCode::parse("INR").unwrap(),
            converted_amount: dec!(249.65),
            effective_rate: dec!(83.21666666666666666666666667),
            recorded_at: "2024-01-15T10:00:00.000Z".to_string(),
        };

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["effectiveRate"], json!("83.21666666666666666666666667"));
        assert_eq!(value["convertedAmount"], json!("249.65"));

        let back: StoredHistoryEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back.effective_rate, entry.effective_rate);
    }

    #[test]
    fn reads_legacy_numeric_entries() {
        let raw = r#"{"id":1705300000000,"amount":100,"from":"USD","to":"INR","result":8321.5,"rate":83.215,"date":"1/15/2024, 10:00:00 AM"}"#;
        let entry: HistoryEntry = serde_json::from_str::<StoredHistoryEntry>(raw).unwrap().into();

        assert_eq!(entry.source.as_str(), "USD");
        assert_eq!(entry.target.as_str(), "INR");
        assert_eq!(entry.amount, dec!(100));
        assert_eq!(entry.converted_amount, dec!(8321.5));
        assert_eq!(entry.effective_rate, dec!(83.215));
        assert_eq!(entry.recorded_at, "1/15/2024, 10:00:00 AM");
    }

    #[test]
    fn rejects_non_numeric_text() {
        let raw = r#"{"id":1,"amount":"lots","source":"USD","target":"INR","convertedAmount":"1","effectiveRate":"1","recordedAt":""}"#;
        assert!(serde_json::from_str::<StoredHistoryEntry>(raw).is_err());
    }
}
