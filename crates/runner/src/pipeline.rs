use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use common::{SeriesStore, TriggerEvent};
use strategy::{Strategy, StrategyOutcome, StrategyRegistry};

use crate::chart::ChartRenderer;
use crate::trigger_log::TriggerSink;

/// What a single pipeline run did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Nothing stored yet for the symbol/interval.
    NoData,
    UnknownStrategy,
    /// Last row is HOLD.
    NoTrigger,
    /// The last row already produced a logged trigger.
    Duplicate,
    Logged(TriggerEvent),
    /// A collaborator failed; the message is also logged.
    Failed(String),
}

type TriggerKey = (String, String, String);

/// Load data, evaluate a strategy, and chart + log any trigger.
///
/// Shared by every strategy job. A trigger is logged at most once per
/// `(symbol, interval, strategy, bar)`: the last logged bar is remembered per
/// key and claimed before any file is written, so re-running against
/// unchanged data, or two overlapping runs, produce no second chart or row.
pub struct StrategyRunner {
    store: Arc<dyn SeriesStore>,
    registry: Arc<StrategyRegistry>,
    charts: Arc<dyn ChartRenderer>,
    log: Arc<dyn TriggerSink>,
    last_logged: Mutex<HashMap<TriggerKey, DateTime<Utc>>>,
}

impl StrategyRunner {
    pub fn new(
        store: Arc<dyn SeriesStore>,
        registry: Arc<StrategyRegistry>,
        charts: Arc<dyn ChartRenderer>,
        log: Arc<dyn TriggerSink>,
    ) -> Self {
        Self {
            store,
            registry,
            charts,
            log,
            last_logged: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run_strategy(&self, strategy_name: &str, symbol: &str, interval: &str) -> RunOutcome {
        info!(strategy = strategy_name, symbol, interval, "Running strategy");
        let outcome = self.evaluate(strategy_name, symbol, interval).await;
        info!(
            strategy = strategy_name,
            symbol,
            interval,
            outcome = outcome.label(),
            "Strategy run completed"
        );
        outcome
    }

    async fn evaluate(&self, strategy_name: &str, symbol: &str, interval: &str) -> RunOutcome {
        let series = match self.store.load(symbol, interval).await {
            Ok(series) => series,
            Err(e) => return failed(format!("failed to load data: {e}")),
        };
        if series.is_empty() {
            warn!(symbol, interval, "No data available");
            return RunOutcome::NoData;
        }

        let Some(strategy) = self.registry.get(strategy_name) else {
            error!(strategy = strategy_name, "Strategy not found");
            return RunOutcome::UnknownStrategy;
        };

        let result = strategy.run(&series);
        let trigger_time = match result.trigger_time {
            Some(t) if result.trigger => t,
            _ => return RunOutcome::NoTrigger,
        };
        info!(
            strategy = strategy_name,
            symbol,
            interval,
            signal = %result.signal,
            trigger_time = %trigger_time,
            "Trigger condition met"
        );

        let key: TriggerKey = (symbol.to_string(), interval.to_string(), strategy_name.to_string());
        let Some(previous) = self.claim(&key, trigger_time).await else {
            info!(strategy = strategy_name, symbol, interval, "Trigger already logged for this bar");
            return RunOutcome::Duplicate;
        };

        let logged = self
            .record(strategy.as_ref(), strategy_name, symbol, interval, trigger_time, &result)
            .await;
        if !matches!(logged, RunOutcome::Logged(_) | RunOutcome::Duplicate) {
            self.release(&key, trigger_time, previous);
        }
        logged
    }

    async fn record(
        &self,
        strategy: &dyn Strategy,
        strategy_name: &str,
        symbol: &str,
        interval: &str,
        trigger_time: DateTime<Utc>,
        result: &StrategyOutcome,
    ) -> RunOutcome {
        let path = match self
            .charts
            .render(
                &result.data,
                symbol,
                interval,
                &strategy_id(strategy_name),
                trigger_time,
                &strategy.plot_config(),
            )
            .await
        {
            Ok(path) => path,
            Err(e) => return failed(format!("chart rendering failed: {e}")),
        };

        let event = TriggerEvent {
            trigger_time,
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            strategy: strategy_name.to_string(),
            signal: result.signal,
            chart_path: path.display().to_string(),
        };
        match self.log.append(&event).await {
            Ok(true) => RunOutcome::Logged(event),
            Ok(false) => RunOutcome::Duplicate,
            Err(e) => failed(format!("failed to append trigger: {e}")),
        }
    }

    /// Mark `trigger_time` as logged for `key`. Returns the previously
    /// remembered time (to restore on failure), or `None` when this bar was
    /// already logged.
    async fn claim(&self, key: &TriggerKey, trigger_time: DateTime<Utc>) -> Option<Option<DateTime<Utc>>> {
        let seeded = self.lock().contains_key(key);
        let seed = if seeded {
            None
        } else {
            match self.log.latest(&key.0, &key.1, &key.2).await {
                Ok(seed) => seed,
                Err(e) => {
                    // the log's unique key still rejects a duplicate row
                    warn!(symbol = %key.0, error = %e, "Could not read last logged trigger");
                    None
                }
            }
        };

        let mut last_logged = self.lock();
        let previous = match last_logged.get(key) {
            Some(t) => Some(*t),
            None => seed,
        };
        if let Some(last) = previous {
            if last >= trigger_time {
                last_logged.insert(key.clone(), last);
                return None;
            }
        }
        last_logged.insert(key.clone(), trigger_time);
        Some(previous)
    }

    fn release(&self, key: &TriggerKey, trigger_time: DateTime<Utc>, previous: Option<DateTime<Utc>>) {
        let mut last_logged = self.lock();
        // a later run may have moved on already
        if last_logged.get(key) != Some(&trigger_time) {
            return;
        }
        match previous {
            Some(t) => last_logged.insert(key.clone(), t),
            None => last_logged.remove(key),
        };
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TriggerKey, DateTime<Utc>>> {
        // entries are plain timestamps, a poisoned map is still consistent
        self.last_logged.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RunOutcome {
    fn label(&self) -> &'static str {
        match self {
            RunOutcome::NoData => "no_data",
            RunOutcome::UnknownStrategy => "unknown_strategy",
            RunOutcome::NoTrigger => "no_trigger",
            RunOutcome::Duplicate => "duplicate",
            RunOutcome::Logged(_) => "logged",
            RunOutcome::Failed(_) => "failed",
        }
    }
}

fn failed(message: String) -> RunOutcome {
    error!(error = %message, "Strategy run failed");
    RunOutcome::Failed(message)
}

/// Short stable id for a strategy name: the first 8 hex digits of its
/// SHA-256. Only used to name chart directories.
pub fn strategy_id(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, FixedOffset, TimeZone};

    use common::{Candle, Error, Result, Series, Signal};
    use strategy::{MacdStrategy, PlotConfig};

    use crate::chart::SvgChartDrawer;
    use crate::trigger_log::TriggerLog;

    fn candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let t = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64);
                Candle {
                    open_time: t,
                    open: 100.0,
                    high: 101.0,
                    low: 99.0,
                    close: 100.0 + i as f64,
                    volume: 5.0,
                    close_time: t + Duration::seconds(3_599),
                }
            })
            .collect()
    }

    #[derive(Default)]
    struct MemoryStore {
        data: Mutex<HashMap<(String, String), Series>>,
    }

    impl MemoryStore {
        fn put(&self, symbol: &str, interval: &str, series: Series) {
            self.data
                .lock()
                .unwrap()
                .insert((symbol.into(), interval.into()), series);
        }
    }

    #[async_trait]
    impl SeriesStore for MemoryStore {
        async fn load(&self, symbol: &str, interval: &str) -> Result<Series> {
            Ok(self
                .data
                .lock()
                .unwrap()
                .get(&(symbol.to_string(), interval.to_string()))
                .cloned()
                .unwrap_or_default())
        }

        async fn save(&self, symbol: &str, interval: &str, series: &Series) -> Result<()> {
            self.put(symbol, interval, series.clone());
            Ok(())
        }
    }

    /// Emits the configured signal on the last row.
    struct FixedSignal(Signal);

    impl Strategy for FixedSignal {
        fn kind(&self) -> &'static str {
            "fixed"
        }

        fn min_periods(&self) -> usize {
            1
        }

        fn calculate_indicators(&self, series: &Series) -> Series {
            series.clone()
        }

        fn generate_signals(&self, series: &Series) -> Series {
            let mut signals = vec![Signal::Hold; series.len()];
            if let Some(last) = signals.last_mut() {
                *last = self.0;
            }
            series.clone().with_signals(signals)
        }

        fn plot_config(&self) -> PlotConfig {
            PlotConfig::default()
        }
    }

    /// Counts renders; fails the first `fail_first` of them.
    struct CountingCharts {
        inner: SvgChartDrawer,
        renders: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl ChartRenderer for CountingCharts {
        async fn render(
            &self,
            series: &Series,
            symbol: &str,
            interval: &str,
            strategy_id: &str,
            trigger_time: DateTime<Utc>,
            plot: &PlotConfig,
        ) -> Result<PathBuf> {
            let n = self.renders.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(Error::Chart("renderer unavailable".into()));
            }
            self.inner
                .render(series, symbol, interval, strategy_id, trigger_time, plot)
                .await
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        charts_dir: PathBuf,
        store: Arc<MemoryStore>,
        charts: Arc<CountingCharts>,
        log: Arc<TriggerLog>,
        runner: Arc<StrategyRunner>,
    }

    async fn fixture(fail_first: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let charts_dir = dir.path().join("charts");
        let store = Arc::new(MemoryStore::default());
        let charts = Arc::new(CountingCharts {
            inner: SvgChartDrawer::new(&charts_dir, FixedOffset::east_opt(0).unwrap()),
            renders: AtomicUsize::new(0),
            fail_first,
        });
        let log = Arc::new(TriggerLog::in_memory().await.unwrap());

        let mut registry = StrategyRegistry::new();
        registry.register("always_buy", Arc::new(FixedSignal(Signal::Buy)));
        registry.register("never", Arc::new(FixedSignal(Signal::Hold)));
        registry.register("macd_default", Arc::new(MacdStrategy::new(12, 26, 9).unwrap()));

        let runner = Arc::new(StrategyRunner::new(
            store.clone(),
            Arc::new(registry),
            charts.clone(),
            log.clone(),
        ));
        Fixture {
            _dir: dir,
            charts_dir,
            store,
            charts,
            log,
            runner,
        }
    }

    #[tokio::test]
    async fn empty_series_writes_nothing() {
        let f = fixture(0).await;

        let outcome = f.runner.run_strategy("always_buy", "BTCUSDT", "1h").await;

        assert_eq!(outcome, RunOutcome::NoData);
        assert_eq!(f.charts.renders.load(Ordering::SeqCst), 0);
        assert!(!f.charts_dir.exists());
        assert!(f.log.query(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_strategy_is_reported() {
        let f = fixture(0).await;
        f.store.put("BTCUSDT", "1h", Series::new(candles(5)));

        let outcome = f.runner.run_strategy("bollinger", "BTCUSDT", "1h").await;
        assert_eq!(outcome, RunOutcome::UnknownStrategy);
    }

    #[tokio::test]
    async fn hold_on_last_row_does_not_trigger() {
        let f = fixture(0).await;
        f.store.put("BTCUSDT", "1h", Series::new(candles(5)));

        assert_eq!(f.runner.run_strategy("never", "BTCUSDT", "1h").await, RunOutcome::NoTrigger);
        // too short for MACD: holds instead of failing
        assert_eq!(f.runner.run_strategy("macd_default", "BTCUSDT", "1h").await, RunOutcome::NoTrigger);
        assert_eq!(f.charts.renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn trigger_renders_chart_and_logs_once() {
        let f = fixture(0).await;
        let data = Series::new(candles(5));
        let last = data.last_open_time().unwrap();
        f.store.put("BTCUSDT", "1h", data);

        let RunOutcome::Logged(event) = f.runner.run_strategy("always_buy", "BTCUSDT", "1h").await else {
            panic!("expected a logged trigger");
        };
        assert_eq!(event.trigger_time, last);
        assert_eq!(event.signal, Signal::Buy);
        assert!(PathBuf::from(&event.chart_path).is_file());
        assert!(event.chart_path.contains(&strategy_id("always_buy")));

        // unchanged tail data
        let again = f.runner.run_strategy("always_buy", "BTCUSDT", "1h").await;
        assert_eq!(again, RunOutcome::Duplicate);
        assert_eq!(f.charts.renders.load(Ordering::SeqCst), 1);
        assert_eq!(f.log.query(10).await.unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn new_bar_triggers_again() {
        let f = fixture(0).await;
        f.store.put("BTCUSDT", "1h", Series::new(candles(5)));
        assert!(matches!(
            f.runner.run_strategy("always_buy", "BTCUSDT", "1h").await,
            RunOutcome::Logged(_)
        ));

        f.store.put("BTCUSDT", "1h", Series::new(candles(6)));
        assert!(matches!(
            f.runner.run_strategy("always_buy", "BTCUSDT", "1h").await,
            RunOutcome::Logged(_)
        ));
        assert_eq!(f.log.query(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn chart_failure_is_contained_and_retried_next_run() {
        let f = fixture(1).await;
        f.store.put("BTCUSDT", "1h", Series::new(candles(5)));

        let first = f.runner.run_strategy("always_buy", "BTCUSDT", "1h").await;
        assert!(matches!(first, RunOutcome::Failed(_)));
        assert!(f.log.query(10).await.unwrap().is_empty());

        // the failed run released its claim on the bar
        let second = f.runner.run_strategy("always_buy", "BTCUSDT", "1h").await;
        assert!(matches!(second, RunOutcome::Logged(_)));
    }

    #[tokio::test]
    async fn previously_logged_bar_is_not_logged_after_restart() {
        let f = fixture(0).await;
        let data = Series::new(candles(5));
        let last = data.last_open_time().unwrap();
        f.store.put("BTCUSDT", "1h", data);
        f.log
            .append(&TriggerEvent {
                trigger_time: last,
                symbol: "BTCUSDT".into(),
                interval: "1h".into(),
                strategy: "always_buy".into(),
                signal: Signal::Buy,
                chart_path: "old.svg".into(),
            })
            .await
            .unwrap();

        let outcome = f.runner.run_strategy("always_buy", "BTCUSDT", "1h").await;
        assert_eq!(outcome, RunOutcome::Duplicate);
        assert_eq!(f.charts.renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn overlapping_runs_log_a_single_row() {
        let f = fixture(0).await;
        f.store.put("ETHUSDT", "4h", Series::new(candles(8)));

        let (a, b) = tokio::join!(
            f.runner.run_strategy("always_buy", "ETHUSDT", "4h"),
            f.runner.run_strategy("always_buy", "ETHUSDT", "4h"),
        );

        let logged = [&a, &b].iter().filter(|o| matches!(o, RunOutcome::Logged(_))).count();
        assert_eq!(logged, 1, "outcomes: {a:?} {b:?}");
        assert_eq!(f.log.query(10).await.unwrap().len(), 1);
    }

    #[test]
    fn strategy_id_is_eight_stable_hex_digits() {
        let id = strategy_id("macd_default");
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, strategy_id("macd_default"));
        assert_ne!(id, strategy_id("rsi_default"));
        // sha256("abc") = ba7816bf...
        assert_eq!(strategy_id("abc"), "ba7816bf");
    }
}
