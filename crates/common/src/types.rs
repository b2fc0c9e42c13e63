use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// One OHLCV row as delivered by a market-data provider and stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
}

/// Trading signal attached to each row by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    #[default]
    Hold,
}

impl Signal {
    /// Ternary encoding: +1 buy, -1 sell, 0 hold.
    pub fn as_i8(self) -> i8 {
        match self {
            Signal::Buy => 1,
            Signal::Sell => -1,
            Signal::Hold => 0,
        }
    }

    pub fn from_i8(value: i8) -> Self {
        match value.signum() {
            1 => Signal::Buy,
            -1 => Signal::Sell,
            _ => Signal::Hold,
        }
    }

    pub fn is_actionable(self) -> bool {
        self != Signal::Hold
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::Hold => write!(f, "HOLD"),
        }
    }
}

impl FromStr for Signal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Signal::Buy),
            "SELL" => Ok(Signal::Sell),
            "HOLD" => Ok(Signal::Hold),
            other => Err(Error::Other(format!("unknown signal '{other}'"))),
        }
    }
}

/// Ordered OHLCV rows plus the indicator and signal columns a strategy appends.
///
/// After construction the rows are sorted by `open_time` and timestamps are
/// unique. Indicator columns always have one entry per row; `None` marks rows
/// where the indicator is not yet defined (warm-up period).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    candles: Vec<Candle>,
    indicators: BTreeMap<String, Vec<Option<f64>>>,
    signals: Vec<Signal>,
}

impl Series {
    /// Build a series, sorting by open time. For duplicated timestamps the
    /// last occurrence in `candles` wins.
    pub fn new(candles: Vec<Candle>) -> Self {
        let mut by_time: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
        for candle in candles {
            by_time.insert(candle.open_time, candle);
        }
        Self {
            candles: by_time.into_values().collect(),
            indicators: BTreeMap::new(),
            signals: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn last_open_time(&self) -> Option<DateTime<Utc>> {
        self.candles.last().map(|c| c.open_time)
    }

    /// Merge freshly fetched rows into this series. Rows in `newer` replace
    /// rows with the same open time. Derived columns are dropped since they
    /// no longer line up with the merged rows.
    pub fn merge(&self, newer: &Series) -> Series {
        let mut rows = self.candles.clone();
        rows.extend(newer.candles.iter().cloned());
        Series::new(rows)
    }

    /// Keep only the last `n` rows (and the matching slice of every column).
    pub fn tail(&self, n: usize) -> Series {
        let start = self.candles.len().saturating_sub(n);
        Series {
            candles: self.candles[start..].to_vec(),
            indicators: self
                .indicators
                .iter()
                .map(|(k, v)| (k.clone(), v[start.min(v.len())..].to_vec()))
                .collect(),
            signals: self.signals[start.min(self.signals.len())..].to_vec(),
        }
    }

    /// Attach an indicator column. Panics in debug builds if the length does
    /// not match the row count.
    pub fn with_indicator(mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        debug_assert_eq!(values.len(), self.candles.len());
        self.indicators.insert(name.into(), values);
        self
    }

    pub fn with_signals(mut self, signals: Vec<Signal>) -> Self {
        debug_assert_eq!(signals.len(), self.candles.len());
        self.signals = signals;
        self
    }

    pub fn indicator(&self, name: &str) -> Option<&[Option<f64>]> {
        self.indicators.get(name).map(|v| v.as_slice())
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// The signal on the most recent row, `Hold` when no signal column exists.
    pub fn last_signal(&self) -> Signal {
        self.signals.last().copied().unwrap_or_default()
    }
}

/// A strategy firing that was (or is about to be) recorded in the trigger log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub trigger_time: DateTime<Utc>,
    pub symbol: String,
    pub interval: String,
    pub strategy: String,
    pub signal: Signal,
    pub chart_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(minute: i64, close: f64) -> Candle {
        let t = Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap();
        Candle {
            open_time: t,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            close_time: t + chrono::Duration::seconds(59),
        }
    }

    #[test]
    fn new_sorts_and_dedups_by_open_time() {
        let series = Series::new(vec![candle(2, 3.0), candle(0, 1.0), candle(2, 4.0)]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.closes(), vec![1.0, 4.0]);
    }

    #[test]
    fn merge_prefers_newer_rows() {
        let stored = Series::new(vec![candle(0, 1.0), candle(1, 2.0)]);
        let fresh = Series::new(vec![candle(1, 20.0), candle(2, 30.0)]);
        let merged = stored.merge(&fresh);
        assert_eq!(merged.closes(), vec![1.0, 20.0, 30.0]);
    }

    #[test]
    fn last_signal_defaults_to_hold() {
        let series = Series::new(vec![candle(0, 1.0)]);
        assert_eq!(series.last_signal(), Signal::Hold);
        let series = series.with_signals(vec![Signal::Sell]);
        assert_eq!(series.last_signal(), Signal::Sell);
    }

    #[test]
    fn tail_slices_every_column() {
        let series = Series::new((0..5).map(|i| candle(i, i as f64)).collect())
            .with_indicator("x", (0..5).map(|i| Some(i as f64)).collect())
            .with_signals(vec![Signal::Hold; 5]);
        let tail = series.tail(2);
        assert_eq!(tail.closes(), vec![3.0, 4.0]);
        assert_eq!(tail.indicator("x").unwrap(), &[Some(3.0), Some(4.0)]);
        assert_eq!(tail.signals().len(), 2);
    }

    #[test]
    fn signal_round_trips_through_display() {
        for s in [Signal::Buy, Signal::Sell, Signal::Hold] {
            assert_eq!(s.to_string().parse::<Signal>().unwrap(), s);
            assert_eq!(Signal::from_i8(s.as_i8()), s);
        }
    }
}
