use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize};

use super::{ProviderFuture, RateProvider};
use crate::{
    errors::{FxError, Result},
    models::{ConversionRequest, ConversionResult, CurrencyCode, RateSnapshot, RuntimeConfig},
};

/// Client for the Frankfurter exchange-rate API (no auth, read-only).
#[derive(Clone)]
pub struct FrankfurterClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl FrankfurterClient {
    pub fn with_config(http_client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
        }
    }

    pub fn from_runtime_config(config: &RuntimeConfig) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http_client = builder.build().unwrap_or_else(|error| {
            log::warn!("falling back to default http client: {error}");
            reqwest::Client::new()
        });
        Self::with_config(http_client, config.api_base_url.clone())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .http_client
            .get(self.endpoint(path))
            .query(query)
            .send()
            .await
            .map_err(|error| FxError::provider(format!("request to /{path} failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FxError::provider(format!(
                "/{path} returned {status}: {body}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|error| FxError::provider(format!("failed to parse /{path} response: {error}")))
    }
}

impl RateProvider for FrankfurterClient {
    fn list_currencies<'a>(&'a self) -> ProviderFuture<'a, BTreeMap<CurrencyCode, String>> {
        Box::pin(async move {
            let raw: HashMap<String, String> = self.get_json("currencies", &[]).await?;
            Ok(catalog_from_raw(raw))
        })
    }

    fn convert<'a>(
        &'a self,
        amount: Decimal,
        source: &'a CurrencyCode,
        target: &'a CurrencyCode,
    ) -> ProviderFuture<'a, ConversionResult> {
        Box::pin(async move {
            let query = [
                ("amount", amount.normalize().to_string()),
                ("from", source.to_string()),
                ("to", target.to_string()),
            ];
            let body: LatestResponse = self.get_json("latest", &query).await?;
            let request = ConversionRequest {
                amount,
                source: source.clone(),
                target: target.clone(),
            };
            body.into_conversion(&request)
        })
    }

    fn snapshot<'a>(&'a self, base: &'a CurrencyCode) -> ProviderFuture<'a, RateSnapshot> {
        Box::pin(async move {
            let body: LatestResponse = self
                .get_json("latest", &[("from", base.to_string())])
                .await?;
            Ok(body.into_snapshot(base))
        })
    }
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    date: NaiveDate,
    #[serde(default)]
    rates: HashMap<String, Decimal>,
}

impl LatestResponse {
    fn into_conversion(self, request: &ConversionRequest) -> Result<ConversionResult> {
        let total = self
            .rates
            .get(request.target.as_str())
            .copied()
            .ok_or_else(|| {
                FxError::provider(format!("response has no rate for {}", request.target))
            })?;
        Ok(ConversionResult::from_total(request, total, self.date))
    }

    fn into_snapshot(self, base: &CurrencyCode) -> RateSnapshot {
        let rates = self
            .rates
            .into_iter()
            .filter_map(|(code, rate)| CurrencyCode::parse(&code).ok().map(|code| (code, rate)))
            .collect();
        RateSnapshot {
            base: base.clone(),
            rates,
            as_of_date: Some(self.date),
            fetched_at: Utc::now(),
        }
    }
}

fn catalog_from_raw(raw: HashMap<String, String>) -> BTreeMap<CurrencyCode, String> {
    raw.into_iter()
        .filter_map(|(code, name)| match CurrencyCode::parse(&code) {
            Ok(code) => Some((code, name)),
            Err(_) => {
                log::debug!("skipping catalog entry with unusable code '{code}'");
                None
            }
        })
        .collect()
}
