pub const EVENT_CONVERSION_LOADING: &str = "conversion://loading";
pub const EVENT_CONVERSION_RESULT: &str = "conversion://result";
pub const EVENT_RATES_SNAPSHOT: &str = "rates://snapshot";
pub const EVENT_HISTORY_CHANGED: &str = "history://changed";
pub const EVENT_FAVORITES_CHANGED: &str = "favorites://changed";
pub const EVENT_RUNTIME_ERROR: &str = "runtime://error";
