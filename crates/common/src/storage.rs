use async_trait::async_trait;

use crate::{Result, Series};

/// Key-value persistence for per-symbol time series.
///
/// Implementations must be safe to call from several worker tasks at once:
/// collection jobs save while strategy jobs load the same key.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// Load the stored series for `(symbol, interval)`. A key that was never
    /// saved yields an empty series, not an error.
    async fn load(&self, symbol: &str, interval: &str) -> Result<Series>;

    /// Replace whatever is stored for `(symbol, interval)` with `series`.
    async fn save(&self, symbol: &str, interval: &str, series: &Series) -> Result<()>;
}
