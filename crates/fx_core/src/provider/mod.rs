use std::{collections::BTreeMap, future::Future, pin::Pin};

use rust_decimal::Decimal;

use crate::{
    errors::Result,
    models::{ConversionResult, CurrencyCode, RateSnapshot},
};

pub mod frankfurter_client;

pub use frankfurter_client::FrankfurterClient;

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Read-only access to a remote exchange-rate service. Every failure is
/// reported as `FxError::ProviderUnavailable`; nothing is retried.
pub trait RateProvider: Send + Sync {
    fn list_currencies<'a>(&'a self) -> ProviderFuture<'a, BTreeMap<CurrencyCode, String>>;

    /// Caller guarantees `source != target`.
    fn convert<'a>(
        &'a self,
        amount: Decimal,
        source: &'a CurrencyCode,
        target: &'a CurrencyCode,
    ) -> ProviderFuture<'a, ConversionResult>;

    fn snapshot<'a>(&'a self, base: &'a CurrencyCode) -> ProviderFuture<'a, RateSnapshot>;
}
