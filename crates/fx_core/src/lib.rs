pub mod calculator;
pub mod engine;
pub mod errors;
pub mod events;
pub mod favorites;
pub mod generation;
pub mod history;
pub mod invoke;
pub mod models;
pub mod provider;
pub mod runtime;
pub mod storage;
pub mod ticker;

pub use errors::{ExpressionError, FxError, Result, ValidationError};
pub use invoke::{InvokeError, InvokeRequest, InvokeResponse};
pub use models::{
    BootstrapState, ConversionRequest, ConversionResult, CurrencyCode, CurrencyPair,
    HistoryEntry, RateSnapshot, RuntimeConfig,
};
pub use provider::{FrankfurterClient, RateProvider};
pub use runtime::Runtime;
pub use storage::{JsonFileStore, MemoryStore, PreferencesStore, StorageService};
pub use ticker::{spawn_rate_ticker, TickerHandle};
