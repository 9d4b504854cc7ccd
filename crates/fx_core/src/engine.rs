use std::sync::Arc;

use chrono::Utc;

use crate::{
    errors::Result,
    history::HistoryLedger,
    models::{ensure_positive, parse_amount, ConversionRequest, ConversionResult, CurrencyCode},
    provider::RateProvider,
};

/// Resolves conversions and records each successful remote one in the
/// history ledger.
#[derive(Clone)]
pub struct ConversionEngine {
    provider: Arc<dyn RateProvider>,
    history: Arc<HistoryLedger>,
}

impl ConversionEngine {
    pub fn new(provider: Arc<dyn RateProvider>, history: Arc<HistoryLedger>) -> Self {
        Self { provider, history }
    }

    pub fn history(&self) -> &Arc<HistoryLedger> {
        &self.history
    }

    pub async fn convert(&self, request: &ConversionRequest) -> Result<ConversionResult> {
        ensure_positive(request.amount)?;

        if request.is_identity() {
            return Ok(ConversionResult::identity(request, Utc::now().date_naive()));
        }

        let result = self
            .provider
            .convert(request.amount, &request.source, &request.target)
            .await
            .inspect_err(|error| {
                log::warn!(
                    "conversion {} {} -> {} failed: {error}",
                    request.amount,
                    request.source,
                    request.target
                )
            })?;

        self.history.record(request, &result)?;
        Ok(result)
    }

    /// Validates raw amount text before converting.
    pub async fn convert_input(
        &self,
        amount_text: &str,
        source: CurrencyCode,
        target: CurrencyCode,
    ) -> Result<ConversionResult> {
        let amount = parse_amount(amount_text)?;
        let request = ConversionRequest::new(amount, source, target)?;
        self.convert(&request).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::{
        errors::{FxError, ValidationError},
        provider::fake::{code, FakeProvider},
        storage::StorageService,
    };

    fn engine_with(provider: Arc<FakeProvider>) -> ConversionEngine {
        let history = Arc::new(HistoryLedger::load(StorageService::in_memory(), 20));
        ConversionEngine::new(provider, history)
    }

    #[tokio::test]
    async fn identity_conversion_skips_network_and_history() {
        let provider = Arc::new(FakeProvider::new());
        let engine = engine_with(provider.clone());

        for amount in [dec!(0.01), dec!(1), dec!(12345.678)] {
            let request = ConversionRequest::new(amount, code("EUR"), code("EUR")).unwrap();
            let result = engine.convert(&request).await.unwrap();
            assert_eq!(result.converted_amount, amount);
            assert_eq!(result.effective_rate, dec!(1));
            assert_eq!(result.as_of_date, Utc::now().date_naive());
        }
        assert_eq!(provider.total_calls(), 0);
        assert!(engine.history().is_empty());
    }

    #[tokio::test]
    async fn invalid_amounts_never_reach_provider() {
        let provider = Arc::new(FakeProvider::new().with_rate("USD", "INR", dec!(83.215)));
        let engine = engine_with(provider.clone());

        for raw in ["", "abc", "0", "-3", "  "] {
            let error = engine
                .convert_input(raw, code("USD"), code("INR"))
                .await
                .unwrap_err();
            assert!(matches!(
                error,
                FxError::Validation(ValidationError::InvalidAmount)
            ));
        }

        let bypass = ConversionRequest {
            amount: dec!(-1),
            source: code("USD"),
            target: code("INR"),
        };
        assert!(engine.convert(&bypass).await.is_err());

        assert_eq!(provider.total_calls(), 0);
        assert!(engine.history().is_empty());
    }

    #[tokio::test]
    async fn usd_to_inr_records_one_entry() {
        let provider = Arc::new(FakeProvider::new().with_rate("USD", "INR", dec!(83.215)));
        let engine = engine_with(provider.clone());

        let result = engine
            .convert_input("100", code("USD"), code("INR"))
            .await
            .unwrap();

        assert_eq!(result.converted_amount, dec!(8321.5));
        assert_eq!(result.effective_rate, dec!(83.215));
        assert_eq!(
            result.as_of_date,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );

        let entries = engine.history().list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, dec!(100));
        assert_eq!(entries[0].source, code("USD"));
        assert_eq!(entries[0].target, code("INR"));
        assert_eq!(entries[0].converted_amount, dec!(8321.5));
        assert_eq!(entries[0].effective_rate, dec!(83.215));
    }

    #[tokio::test]
    async fn provider_failure_leaves_history_untouched() {
        let provider = Arc::new(FakeProvider::new().with_rate("USD", "EUR", dec!(0.9)));
        let engine = engine_with(provider.clone());
        engine
            .convert_input("10", code("USD"), code("EUR"))
            .await
            .unwrap();
        let before = engine.history().list();

        provider.set_failing(true);
        let error = engine
            .convert_input("20", code("USD"), code("EUR"))
            .await
            .unwrap_err();

        assert!(matches!(error, FxError::ProviderUnavailable(_)));
        assert_eq!(engine.history().list(), before);
    }

    #[tokio::test]
    async fn more_than_capacity_keeps_latest_twenty() {
        let provider = Arc::new(FakeProvider::new().with_rate("GBP", "USD", dec!(1.27)));
        let engine = engine_with(provider);

        for i in 1..=23 {
            engine
                .convert_input(&i.to_string(), code("GBP"), code("USD"))
                .await
                .unwrap();
        }

        let amounts = engine
            .history()
            .list()
            .iter()
            .map(|entry| entry.amount)
            .collect::<Vec<_>>();
        assert_eq!(amounts.len(), 20);
        assert_eq!(amounts.first(), Some(&dec!(23)));
        assert_eq!(amounts.last(), Some(&dec!(4)));
    }
}
