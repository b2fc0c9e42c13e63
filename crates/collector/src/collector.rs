use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use common::{Candle, MarketDataProvider, Result, Series, SeriesStore};

/// Pulls recent candles from a provider and merges them into storage.
pub struct DataCollector {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<dyn SeriesStore>,
    /// Fixed allow-list; empty means ask the provider.
    symbols: Vec<String>,
    lookback: Duration,
}

impl DataCollector {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn SeriesStore>,
        symbols: Vec<String>,
        lookback_days: i64,
    ) -> Self {
        Self {
            provider,
            store,
            symbols,
            lookback: Duration::days(lookback_days),
        }
    }

    async fn symbols(&self) -> Vec<String> {
        if self.symbols.is_empty() {
            self.provider.get_symbols().await
        } else {
            self.symbols.clone()
        }
    }

    /// Fetch the lookback window for every symbol at `interval` and merge it
    /// into storage. Failures for one symbol are logged and do not stop the
    /// others. Returns how many symbols were updated.
    pub async fn update_data_for_interval(&self, interval: &str) -> usize {
        let symbols = self.symbols().await;
        if symbols.is_empty() {
            warn!(provider = self.provider.name(), interval, "No symbols to collect");
            return 0;
        }

        let end = Utc::now();
        let start = end - self.lookback;
        let mut updated = 0;

        for symbol in &symbols {
            let fresh = self.provider.get_klines(symbol, interval, start, end).await;
            if fresh.is_empty() {
                debug!(symbol = %symbol, interval, "Provider returned no rows");
                continue;
            }
            match self.merge_new_data(symbol, interval, fresh).await {
                Ok(_) => updated += 1,
                Err(e) => error!(symbol = %symbol, interval, error = %e, "Failed to store collected data"),
            }
        }

        info!(
            provider = self.provider.name(),
            interval,
            updated,
            total = symbols.len(),
            "Data updated for interval"
        );
        updated
    }

    /// Merge `fresh` into whatever is stored for the key, newer rows winning
    /// on equal timestamps. Returns the stored row count.
    pub async fn merge_new_data(&self, symbol: &str, interval: &str, fresh: Vec<Candle>) -> Result<usize> {
        let existing = self.store.load(symbol, interval).await?;
        let merged = existing.merge(&Series::new(fresh));
        self.store.save(symbol, interval, &merged).await?;
        Ok(merged.len())
    }
}
