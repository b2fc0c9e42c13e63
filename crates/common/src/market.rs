use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Candle;

/// Abstraction over an exchange or data-provider REST API.
///
/// `BinanceClient` and `CoinGeckoClient` in `crates/collector` implement this.
/// Provider-side failures are logged by the implementation and surface as an
/// empty result, so a flaky provider never takes a collection job down.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &str;

    /// Historical candles for `symbol` at `interval` between `start` and `end`,
    /// oldest first.
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Candle>;

    /// Identifiers of every symbol currently tradable on the provider.
    async fn get_symbols(&self) -> Vec<String>;
}
