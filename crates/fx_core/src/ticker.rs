use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

use crate::runtime::Runtime;

/// Background rate refresh. Aborted when stopped or dropped.
pub struct TickerHandle {
    task: JoinHandle<()>,
}

impl TickerHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Refreshes rates for the current base every `period`, starting one period
/// from now. Each refresh runs as its own task so a slow provider never
/// delays the next tick; overlapping responses are resolved by the runtime.
pub fn spawn_rate_ticker(runtime: Arc<Runtime>, period: Duration) -> TickerHandle {
    let period = period.max(Duration::from_secs(1));
    let task = tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let runtime = runtime.clone();
            tokio::spawn(async move {
                if let Err(error) = runtime.refresh_rates(None).await {
                    log::debug!("scheduled rate refresh skipped: {error}");
                }
            });
        }
    });
    TickerHandle { task }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::{
        models::RuntimeConfig,
        provider::fake::FakeProvider,
        storage::MemoryStore,
    };

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_once_per_period_until_stopped() {
        let provider = Arc::new(FakeProvider::new().with_snapshot("USD", &[("EUR", dec!(0.9))]));
        let runtime = Arc::new(Runtime::with_parts(
            RuntimeConfig::default(),
            Arc::new(MemoryStore::new()),
            provider.clone(),
        ));

        let handle = spawn_rate_ticker(runtime.clone(), Duration::from_secs(60));
        settle().await;
        assert_eq!(provider.snapshot_calls.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(provider.snapshot_calls.load(Ordering::SeqCst), 1);
        assert!(runtime.snapshot().is_some());

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(provider.snapshot_calls.load(Ordering::SeqCst), 2);

        handle.stop();
        tokio::time::advance(Duration::from_secs(180)).await;
        settle().await;
        assert_eq!(provider.snapshot_calls.load(Ordering::SeqCst), 2);
    }
}
