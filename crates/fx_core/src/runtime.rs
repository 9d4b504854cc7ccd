use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    calculator,
    engine::ConversionEngine,
    errors::{FxError, Result, ValidationError},
    events::{
        EVENT_CONVERSION_LOADING, EVENT_CONVERSION_RESULT, EVENT_FAVORITES_CHANGED,
        EVENT_HISTORY_CHANGED, EVENT_RATES_SNAPSHOT, EVENT_RUNTIME_ERROR,
    },
    favorites::FavoritesSet,
    generation::RequestGate,
    history::HistoryLedger,
    models::{
        parse_amount, popular_pairs, BootstrapState, ConversionRequest, ConversionResult,
        CurrencyCode, CurrencyOption, CurrencyOptions, CurrencyPair, HistoryEntry, PopularPair,
        RateSnapshot, RateTicker, RuntimeConfig, DEFAULT_TICKER_SIZE,
    },
    provider::{FrankfurterClient, RateProvider},
    storage::{PreferencesStore, StorageService},
};

type SharedCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

pub const DEFAULT_AMOUNT: &str = "1";

struct RuntimeState {
    catalog: BTreeMap<CurrencyCode, String>,
    pair: CurrencyPair,
    amount: String,
    last_result: Option<ConversionResult>,
    snapshot: Option<RateSnapshot>,
}

/// Outcome of one triggered conversion. `applied` is false when a newer
/// conversion was issued while this one was in flight.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutcome {
    pub token: u64,
    pub applied: bool,
    pub result: ConversionResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairSelection {
    pub pair: CurrencyPair,
    pub result: Option<ConversionResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteToggle {
    pub code: CurrencyCode,
    pub favorite: bool,
    pub favorites: Vec<CurrencyCode>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatorOutcome {
    pub value: Decimal,
    pub conversion: ConversionOutcome,
}

/// Application controller: owns the widget state and is the single entry
/// point for every command the shell issues.
pub struct Runtime {
    config: RuntimeConfig,
    provider: Arc<dyn RateProvider>,
    engine: ConversionEngine,
    history: Arc<HistoryLedger>,
    favorites: FavoritesSet,
    state: Mutex<RuntimeState>,
    conversions: RequestGate,
    refreshes: RequestGate,
    loading: AtomicUsize,
    callback: Mutex<Option<SharedCallback>>,
}

impl Runtime {
    /// Builds a runtime from a JSON `RuntimeConfig`. An empty string means
    /// defaults with in-memory storage.
    pub fn new(config_json: &str) -> anyhow::Result<Self> {
        let config = if config_json.trim().is_empty() {
            RuntimeConfig::default()
        } else {
            serde_json::from_str(config_json)?
        };
        Self::from_config(config)
    }

    pub fn from_config(config: RuntimeConfig) -> anyhow::Result<Self> {
        let storage = match &config.data_dir {
            Some(dir) => StorageService::open(PathBuf::from(dir))?,
            None => {
                log::info!("no data dir configured, preferences will not outlive this process");
                StorageService::in_memory()
            }
        };
        let provider = Arc::new(FrankfurterClient::from_runtime_config(&config));
        Ok(Self::assemble(config, storage, provider))
    }

    /// Wires injected persistence and provider, e.g. in-memory fakes.
    pub fn with_parts(
        config: RuntimeConfig,
        store: Arc<dyn PreferencesStore>,
        provider: Arc<dyn RateProvider>,
    ) -> Self {
        Self::assemble(config, StorageService::new(store), provider)
    }

    fn assemble(
        config: RuntimeConfig,
        storage: StorageService,
        provider: Arc<dyn RateProvider>,
    ) -> Self {
        let history = Arc::new(HistoryLedger::load(
            storage.clone(),
            config.history_capacity.max(1),
        ));
        let favorites = FavoritesSet::load(storage);
        let engine = ConversionEngine::new(provider.clone(), history.clone());

        Self {
            config,
            provider,
            engine,
            history,
            favorites,
            state: Mutex::new(RuntimeState {
                catalog: BTreeMap::new(),
                pair: CurrencyPair::default(),
                amount: DEFAULT_AMOUNT.to_string(),
                last_result: None,
                snapshot: None,
            }),
            conversions: RequestGate::new(),
            refreshes: RequestGate::new(),
            loading: AtomicUsize::new(0),
            callback: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        *lock(&self.callback) = Some(Arc::new(callback));
    }

    pub fn clear_event_callback(&self) {
        *lock(&self.callback) = None;
    }

    /// Startup sequence: catalog, first rate snapshot, first conversion.
    /// Individual failures are reported as events and do not abort startup.
    pub async fn initialize(&self) -> BootstrapState {
        self.load_currencies().await;
        let _ = self.refresh_rates(None).await;
        let _ = self.convert_current().await;
        self.bootstrap_state()
    }

    /// Fetches the provider catalog. On failure the previous catalog (empty
    /// at startup) is kept and nothing becomes selectable.
    pub async fn load_currencies(&self) -> CurrencyOptions {
        match self.provider.list_currencies().await {
            Ok(catalog) => {
                log::info!("loaded {} currencies", catalog.len());
                lock(&self.state).catalog = catalog;
            }
            Err(error) => {
                log::warn!("currency catalog unavailable: {error}");
                self.emit_error(&error, "catalog");
            }
        }
        self.currency_options()
    }

    pub fn currency_options(&self) -> CurrencyOptions {
        let state = lock(&self.state);
        let option = |code: &CurrencyCode, name: &String| CurrencyOption {
            code: code.clone(),
            name: name.clone(),
        };
        CurrencyOptions {
            favorites: self
                .favorites
                .list()
                .iter()
                .filter_map(|code| state.catalog.get(code).map(|name| option(code, name)))
                .collect(),
            all: state
                .catalog
                .iter()
                .map(|(code, name)| option(code, name))
                .collect(),
        }
    }

    pub fn pair(&self) -> CurrencyPair {
        lock(&self.state).pair.clone()
    }

    pub fn last_result(&self) -> Option<ConversionResult> {
        lock(&self.state).last_result.clone()
    }

    pub fn snapshot(&self) -> Option<RateSnapshot> {
        lock(&self.state).snapshot.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    /// Converts `amount_text`, optionally switching the selected pair first.
    /// Only the most recently issued conversion updates the displayed result.
    pub async fn convert(
        &self,
        amount_text: &str,
        pair: Option<CurrencyPair>,
    ) -> Result<ConversionOutcome> {
        if let Some(pair) = &pair {
            self.ensure_known(&pair.source)?;
            self.ensure_known(&pair.target)?;
        }
        let pair = {
            let mut state = lock(&self.state);
            state.amount = amount_text.trim().to_string();
            if let Some(pair) = pair {
                state.pair = pair;
            }
            state.pair.clone()
        };
        let token = self.conversions.issue();

        let request = match parse_amount(amount_text)
            .and_then(|amount| ConversionRequest::new(amount, pair.source, pair.target))
        {
            Ok(request) => request,
            Err(error) => {
                if self.conversions.is_current(token) {
                    lock(&self.state).last_result = None;
                }
                return Err(error.into());
            }
        };

        let outcome = if request.is_identity() {
            self.engine.convert(&request).await
        } else {
            let _loading = LoadingGuard::enter(self);
            self.engine.convert(&request).await
        };

        let result = match outcome {
            Ok(result) => result,
            Err(error) => {
                if self.conversions.is_current(token) {
                    self.emit_error(&error, "conversion");
                } else {
                    log::debug!("ignoring failure of stale conversion #{}: {error}", token.value());
                }
                return Err(error);
            }
        };

        if !request.is_identity() {
            self.emit_event(EVENT_HISTORY_CHANGED, &json!(self.history.list()));
        }

        let applied = self.conversions.is_current(token);
        if applied {
            lock(&self.state).last_result = Some(result.clone());
            self.emit_event(EVENT_CONVERSION_RESULT, &json!(result));
        } else {
            log::debug!(
                "discarding stale conversion #{} ({} -> {})",
                token.value(),
                result.source,
                result.target
            );
        }

        Ok(ConversionOutcome {
            token: token.value(),
            applied,
            result,
        })
    }

    /// Re-runs the conversion for the current amount and pair.
    pub async fn convert_current(&self) -> Result<ConversionOutcome> {
        let amount = lock(&self.state).amount.clone();
        self.convert(&amount, None).await
    }

    /// Replaces the rate snapshot for `base` (default: current source).
    /// A failed or stale refresh keeps whatever snapshot is already held.
    pub async fn refresh_rates(&self, base: Option<CurrencyCode>) -> Result<Option<RateTicker>> {
        let base = base.unwrap_or_else(|| self.pair().source);
        let token = self.refreshes.issue();

        let snapshot = match self.provider.snapshot(&base).await {
            Ok(snapshot) => snapshot,
            Err(error) if self.refreshes.is_current(token) => {
                log::warn!("rate refresh for {base} failed: {error}");
                self.emit_error(&error, "rates");
                return Err(error);
            }
            Err(error) => {
                log::debug!("ignoring failure of stale rate refresh #{}: {error}", token.value());
                return Err(error);
            }
        };

        if !self.refreshes.is_current(token) {
            log::debug!("discarding stale rate snapshot #{} for {base}", token.value());
            return Ok(self.ticker());
        }

        let ticker = RateTicker::from_snapshot(&snapshot, DEFAULT_TICKER_SIZE);
        lock(&self.state).snapshot = Some(snapshot);
        self.emit_event(EVENT_RATES_SNAPSHOT, &json!(ticker));
        Ok(Some(ticker))
    }

    pub fn ticker(&self) -> Option<RateTicker> {
        lock(&self.state)
            .snapshot
            .as_ref()
            .map(|snapshot| RateTicker::from_snapshot(snapshot, DEFAULT_TICKER_SIZE))
    }

    /// Selects a new pair, re-converts, and refreshes rates when the base
    /// currency changed. Follow-up failures surface as events only.
    pub async fn select_pair(&self, pair: CurrencyPair) -> Result<PairSelection> {
        self.ensure_known(&pair.source)?;
        self.ensure_known(&pair.target)?;
        let base_changed = self.pair().source != pair.source;
        self.apply_pair(pair, base_changed).await
    }

    pub async fn swap_currencies(&self) -> Result<PairSelection> {
        let swapped = self.pair().swapped();
        self.apply_pair(swapped, true).await
    }

    pub fn popular_pairs(&self) -> Vec<PopularPair> {
        popular_pairs()
    }

    pub async fn select_popular_pair(&self, index: usize) -> Result<PairSelection> {
        let pair = popular_pairs()
            .into_iter()
            .nth(index)
            .ok_or_else(|| FxError::NotFound(format!("popular pair {index}")))?;
        self.apply_pair(
            CurrencyPair {
                source: pair.source,
                target: pair.target,
            },
            true,
        )
        .await
    }

    /// Restores the inputs of a past conversion and converts them again.
    pub async fn load_from_history(&self, id: u64) -> Result<ConversionOutcome> {
        let request = self.history.replay(id)?;
        self.convert(
            &request.amount.to_string(),
            Some(CurrencyPair {
                source: request.source,
                target: request.target,
            }),
        )
        .await
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.list()
    }

    pub fn clear_history(&self) -> Result<()> {
        self.history.clear()?;
        self.emit_event(EVENT_HISTORY_CHANGED, &json!([]));
        Ok(())
    }

    pub fn favorites(&self) -> Vec<CurrencyCode> {
        self.favorites.list()
    }

    pub fn toggle_favorite(&self, code: &CurrencyCode) -> Result<FavoriteToggle> {
        let favorite = self.favorites.toggle(code)?;
        let favorites = self.favorites.list();
        self.emit_event(EVENT_FAVORITES_CHANGED, &json!(favorites));
        Ok(FavoriteToggle {
            code: code.clone(),
            favorite,
            favorites,
        })
    }

    pub fn evaluate_expression(&self, expression: &str) -> Result<Decimal> {
        Ok(calculator::evaluate(expression)?)
    }

    /// Evaluates the calculator display, makes it the amount and converts.
    pub async fn apply_calculator(&self, expression: &str) -> Result<CalculatorOutcome> {
        let value = self.evaluate_expression(expression)?;
        let conversion = self.convert(&value.to_string(), None).await?;
        Ok(CalculatorOutcome { value, conversion })
    }

    pub fn bootstrap_state(&self) -> BootstrapState {
        let currencies = self.currency_options();
        let state = lock(&self.state);
        BootstrapState {
            platform: self
                .config
                .platform
                .clone()
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            currencies,
            favorites: self.favorites.list(),
            pair: state.pair.clone(),
            amount: state.amount.clone(),
            last_result: state.last_result.clone(),
            history: self.history.list(),
            rates: state
                .snapshot
                .as_ref()
                .map(|snapshot| RateTicker::from_snapshot(snapshot, DEFAULT_TICKER_SIZE)),
            popular_pairs: popular_pairs(),
            loading: self.is_loading(),
        }
    }

    async fn apply_pair(&self, pair: CurrencyPair, refresh: bool) -> Result<PairSelection> {
        lock(&self.state).pair = pair.clone();

        let result = self
            .convert_current()
            .await
            .ok()
            .filter(|outcome| outcome.applied)
            .map(|outcome| outcome.result);
        if refresh {
            let _ = self.refresh_rates(Some(pair.source.clone())).await;
        }
        Ok(PairSelection { pair, result })
    }

    /// Rejects codes missing from a loaded catalog. With no catalog loaded
    /// the provider is left to decide.
    fn ensure_known(&self, code: &CurrencyCode) -> Result<()> {
        let state = lock(&self.state);
        if state.catalog.is_empty() || state.catalog.contains_key(code) {
            Ok(())
        } else {
            Err(ValidationError::UnknownCurrency(code.to_string()).into())
        }
    }

    fn set_loading(&self, entering: bool) {
        // only the idle <-> loading edges are reported
        let edge = if entering {
            self.loading.fetch_add(1, Ordering::SeqCst) == 0
        } else {
            self.loading.fetch_sub(1, Ordering::SeqCst) == 1
        };
        if edge {
            self.emit_event(EVENT_CONVERSION_LOADING, &json!({ "loading": entering }));
        }
    }

    fn emit_error(&self, error: &FxError, source: &str) {
        self.emit_event(
            EVENT_RUNTIME_ERROR,
            &json!({
                "code": error.code(),
                "message": error.to_string(),
                "source": source,
            }),
        );
    }

    pub(crate) fn emit_event(&self, event: &str, payload: &Value) {
        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            let event_payload = json!({
                "event": event,
                "payload": payload
            });
            callback(event, &event_payload);
        }
    }
}

/// Marks a provider call in flight; clears on drop whatever the outcome.
struct LoadingGuard<'a> {
    runtime: &'a Runtime,
}

impl<'a> LoadingGuard<'a> {
    fn enter(runtime: &'a Runtime) -> Self {
        runtime.set_loading(true);
        Self { runtime }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.runtime.set_loading(false);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::{
        provider::fake::{code, FakeProvider},
        storage::MemoryStore,
    };

    type Recorded = Arc<Mutex<Vec<(String, Value)>>>;

    fn runtime_with(provider: Arc<FakeProvider>) -> (Runtime, Arc<MemoryStore>, Recorded) {
        let store = Arc::new(MemoryStore::new());
        let runtime = Runtime::with_parts(RuntimeConfig::default(), store.clone(), provider);
        let events: Recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        runtime.set_event_callback(move |event, payload| {
            sink.lock()
                .unwrap()
                .push((event.to_string(), payload["payload"].clone()));
        });
        (runtime, store, events)
    }

    fn named(events: &Recorded, name: &str) -> Vec<Value> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    fn usd_provider() -> FakeProvider {
        FakeProvider::new()
            .with_rate("USD", "INR", dec!(83.215))
            .with_rate("INR", "USD", dec!(0.012))
            .with_rate("USD", "EUR", dec!(0.9))
            .with_catalog(&[
                ("USD", "United States Dollar"),
                ("INR", "Indian Rupee"),
                ("EUR", "Euro"),
                ("AUD", "Australian Dollar"),
            ])
            .with_snapshot("USD", &[("EUR", dec!(0.9)), ("INR", dec!(83.215))])
            .with_snapshot("INR", &[("USD", dec!(0.012))])
            .with_snapshot("EUR", &[("USD", dec!(1.1))])
    }

    #[tokio::test]
    async fn initialize_loads_catalog_rates_and_first_conversion() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, events) = runtime_with(provider);

        let state = runtime.initialize().await;

        assert_eq!(state.pair, CurrencyPair::default());
        assert_eq!(state.amount, DEFAULT_AMOUNT);
        assert_eq!(state.currencies.all.len(), 4);
        // favorites missing from the catalog are not offered
        let favorite_codes = state
            .currencies
            .favorites
            .iter()
            .map(|option| option.code.as_str().to_string())
            .collect::<Vec<_>>();
        assert_eq!(favorite_codes, vec!["USD", "EUR", "INR"]);
        assert_eq!(state.last_result.unwrap().converted_amount, dec!(83.215));
        let rates = state.rates.unwrap();
        assert_eq!(rates.rates[0].code, code("INR"));
        assert!(!state.loading);
        assert_eq!(named(&events, EVENT_RATES_SNAPSHOT).len(), 1);
    }

    #[tokio::test]
    async fn stale_conversion_does_not_replace_newer_result() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, events) = runtime_with(provider.clone());
        let runtime = Arc::new(runtime);

        let gate = provider.hold_next_call();
        let first = tokio::spawn({
            let runtime = runtime.clone();
            async move { runtime.convert("10", None).await }
        });
        while provider.convert_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let second = runtime.convert("20", None).await.unwrap();
        assert!(second.applied);
        assert!(runtime.is_loading());

        gate.notify_one();
        let first = first.await.unwrap().unwrap();

        assert!(!first.applied);
        assert!(first.token < second.token);
        assert_eq!(runtime.last_result().unwrap().amount, dec!(20));
        assert!(!runtime.is_loading());
        assert_eq!(named(&events, EVENT_CONVERSION_RESULT).len(), 1);
        // both completed conversions were recorded
        assert_eq!(runtime.history().len(), 2);
    }

    #[tokio::test]
    async fn failed_conversion_keeps_previous_result_and_clears_loading() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, events) = runtime_with(provider.clone());
        runtime.convert("100", None).await.unwrap();
        let before = runtime.last_result();

        provider.set_failing(true);
        let error = runtime.convert("200", None).await.unwrap_err();

        assert_eq!(error.code(), "provider_unavailable");
        assert_eq!(runtime.last_result(), before);
        assert_eq!(runtime.history().len(), 1);
        assert!(!runtime.is_loading());

        let loading = named(&events, EVENT_CONVERSION_LOADING);
        assert_eq!(
            loading,
            vec![
                json!({ "loading": true }),
                json!({ "loading": false }),
                json!({ "loading": true }),
                json!({ "loading": false }),
            ]
        );
        let errors = named(&events, EVENT_RUNTIME_ERROR);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["code"], "provider_unavailable");
        assert_eq!(errors[0]["source"], "conversion");
    }

    #[tokio::test]
    async fn superseded_conversion_failure_is_not_reported() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, events) = runtime_with(provider.clone());
        let runtime = Arc::new(runtime);

        let gate = provider.hold_next_call();
        let first = tokio::spawn({
            let runtime = runtime.clone();
            async move { runtime.convert("10", None).await }
        });
        while provider.convert_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let second = runtime.convert("20", None).await.unwrap();

        provider.set_failing(true);
        gate.notify_one();
        let error = first.await.unwrap().unwrap_err();

        assert_eq!(error.code(), "provider_unavailable");
        assert!(named(&events, EVENT_RUNTIME_ERROR).is_empty());
        assert_eq!(runtime.last_result(), Some(second.result));
        assert!(!runtime.is_loading());
    }

    #[tokio::test]
    async fn superseded_refresh_failure_is_not_reported() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, events) = runtime_with(provider.clone());
        let runtime = Arc::new(runtime);

        let gate = provider.hold_next_call();
        let slow = tokio::spawn({
            let runtime = runtime.clone();
            async move { runtime.refresh_rates(Some(code("USD"))).await }
        });
        while provider.snapshot_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        runtime.refresh_rates(Some(code("EUR"))).await.unwrap();

        provider.set_failing(true);
        gate.notify_one();
        assert!(slow.await.unwrap().is_err());

        assert!(named(&events, EVENT_RUNTIME_ERROR).is_empty());
        assert_eq!(runtime.snapshot().unwrap().base, code("EUR"));
    }

    #[tokio::test]
    async fn invalid_amount_clears_result_without_provider_call() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, _) = runtime_with(provider.clone());
        runtime.convert("5", None).await.unwrap();
        let calls = provider.total_calls();

        let error = runtime.convert("-5", None).await.unwrap_err();

        assert_eq!(error.code(), "invalid_amount");
        assert!(runtime.last_result().is_none());
        assert_eq!(provider.total_calls(), calls);
        assert_eq!(runtime.bootstrap_state().amount, "-5");
    }

    #[tokio::test]
    async fn identity_pair_converts_locally() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, events) = runtime_with(provider.clone());

        let outcome = runtime
            .convert(
                "42",
                Some(CurrencyPair {
                    source: code("EUR"),
                    target: code("EUR"),
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome.result.converted_amount, dec!(42));
        assert_eq!(provider.total_calls(), 0);
        assert!(runtime.history().is_empty());
        assert!(named(&events, EVENT_CONVERSION_LOADING).is_empty());
    }

    #[tokio::test]
    async fn codes_outside_loaded_catalog_are_rejected() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, _) = runtime_with(provider.clone());
        runtime.load_currencies().await;

        let error = runtime
            .select_pair(CurrencyPair {
                source: code("USD"),
                target: code("XYZ"),
            })
            .await
            .unwrap_err();

        assert_eq!(error.code(), "unknown_currency");
        assert_eq!(runtime.pair(), CurrencyPair::default());
        assert_eq!(provider.convert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn swap_reconverts_and_refreshes_for_new_base() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, _) = runtime_with(provider.clone());
        runtime.convert("100", None).await.unwrap();

        let selection = runtime.swap_currencies().await.unwrap();

        assert_eq!(selection.pair.source, code("INR"));
        assert_eq!(selection.pair.target, code("USD"));
        assert_eq!(selection.result.unwrap().converted_amount, dec!(1.2));
        assert_eq!(runtime.snapshot().unwrap().base, code("INR"));
    }

    #[tokio::test]
    async fn select_pair_with_same_base_skips_refresh() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, _) = runtime_with(provider.clone());

        runtime
            .select_pair(CurrencyPair {
                source: code("USD"),
                target: code("EUR"),
            })
            .await
            .unwrap();

        assert_eq!(provider.snapshot_calls.load(Ordering::SeqCst), 0);
        assert_eq!(runtime.last_result().unwrap().target, code("EUR"));
    }

    #[tokio::test]
    async fn popular_pair_selection_by_index() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, _) = runtime_with(provider);

        let selection = runtime.select_popular_pair(0).await.unwrap();
        assert_eq!(selection.pair.source, code("USD"));
        assert_eq!(selection.pair.target, code("EUR"));

        let error = runtime.select_popular_pair(99).await.unwrap_err();
        assert_eq!(error.code(), "not_found");
    }

    #[tokio::test]
    async fn stale_refresh_is_dropped_and_failure_keeps_snapshot() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, _) = runtime_with(provider.clone());
        let runtime = Arc::new(runtime);

        let gate = provider.hold_next_call();
        let slow = tokio::spawn({
            let runtime = runtime.clone();
            async move { runtime.refresh_rates(Some(code("USD"))).await }
        });
        while provider.snapshot_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        runtime.refresh_rates(Some(code("EUR"))).await.unwrap();
        gate.notify_one();
        slow.await.unwrap().unwrap();

        assert_eq!(runtime.snapshot().unwrap().base, code("EUR"));

        provider.set_failing(true);
        assert!(runtime.refresh_rates(None).await.is_err());
        assert_eq!(runtime.snapshot().unwrap().base, code("EUR"));
    }

    #[tokio::test]
    async fn history_replay_restores_inputs() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, _) = runtime_with(provider);
        runtime.convert("7", None).await.unwrap();
        runtime
            .select_pair(CurrencyPair {
                source: code("USD"),
                target: code("EUR"),
            })
            .await
            .unwrap();
        let oldest = runtime.history().last().cloned().unwrap();

        let outcome = runtime.load_from_history(oldest.id).await.unwrap();

        assert!(outcome.applied);
        assert_eq!(runtime.pair(), CurrencyPair::default());
        assert_eq!(runtime.bootstrap_state().amount, "7");
        assert_eq!(outcome.result.converted_amount, dec!(582.505));

        let error = runtime.load_from_history(1).await.unwrap_err();
        assert_eq!(error.code(), "not_found");
    }

    #[tokio::test]
    async fn clear_history_empties_list_and_notifies() {
        let provider = Arc::new(usd_provider());
        let (runtime, store, events) = runtime_with(provider);
        runtime.convert("3", None).await.unwrap();

        runtime.clear_history().unwrap();

        assert!(runtime.history().is_empty());
        assert!(!store.contains_key(crate::storage::schema::KEY_HISTORY));
        let changes = named(&events, EVENT_HISTORY_CHANGED);
        assert_eq!(changes.last(), Some(&json!([])));
    }

    #[tokio::test]
    async fn toggling_favorite_persists_and_notifies() {
        let provider = Arc::new(usd_provider());
        let (runtime, store, events) = runtime_with(provider);

        let added = runtime.toggle_favorite(&code("AUD")).unwrap();
        assert!(added.favorite);
        assert_eq!(added.favorites.last(), Some(&code("AUD")));
        assert!(store.contains_key(crate::storage::schema::KEY_FAVORITES));

        let removed = runtime.toggle_favorite(&code("AUD")).unwrap();
        assert!(!removed.favorite);
        assert_eq!(named(&events, EVENT_FAVORITES_CHANGED).len(), 2);

        store.set_fail_writes(true);
        let error = runtime.toggle_favorite(&code("USD")).unwrap_err();
        assert_eq!(error.code(), "storage_failure");
        assert!(runtime.favorites().contains(&code("USD")));
    }

    #[tokio::test]
    async fn calculator_result_becomes_amount() {
        let provider = Arc::new(usd_provider());
        let (runtime, _, _) = runtime_with(provider.clone());

        let outcome = runtime.apply_calculator("2 + 3 * 2.5").await.unwrap();
        assert_eq!(outcome.value, dec!(9.5));
        assert_eq!(outcome.conversion.result.converted_amount, dec!(790.5425));
        assert_eq!(runtime.bootstrap_state().amount, "9.5");

        let calls = provider.total_calls();
        let error = runtime.apply_calculator("2 +").await.unwrap_err();
        assert_eq!(error.code(), "invalid_expression");
        assert_eq!(provider.total_calls(), calls);
    }
}
