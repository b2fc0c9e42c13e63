use common::{Result, Series, Signal};
use tracing::debug;

use crate::indicators::{crossover_signals, MacdIndicator, MomentumIndicator, RsiIndicator};
use crate::{PlotConfig, Strategy};

fn all_hold(series: &Series) -> Vec<Signal> {
    vec![Signal::Hold; series.len()]
}

// ─── MACD crossover ───────────────────────────────────────────────────────────

/// Buys when the MACD line crosses above its signal line, sells on the
/// opposite cross.
#[derive(Debug, Clone)]
pub struct MacdStrategy {
    indicator: MacdIndicator,
}

impl MacdStrategy {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self> {
        Ok(Self {
            indicator: MacdIndicator::new(fast, slow, signal)?,
        })
    }
}

impl Strategy for MacdStrategy {
    fn kind(&self) -> &'static str {
        "macd"
    }

    fn min_periods(&self) -> usize {
        self.indicator.min_periods()
    }

    fn calculate_indicators(&self, series: &Series) -> Series {
        let lines = self.indicator.compute(&series.closes());
        series
            .clone()
            .with_indicator("macd", lines.macd)
            .with_indicator("macd_signal", lines.signal)
            .with_indicator("macd_hist", lines.histogram)
    }

    fn generate_signals(&self, series: &Series) -> Series {
        if series.len() < self.min_periods() {
            debug!(rows = series.len(), needed = self.min_periods(), "MACD: not enough rows");
            return series.clone().with_signals(all_hold(series));
        }
        let data = self.calculate_indicators(series);
        let signals = match (data.indicator("macd"), data.indicator("macd_signal")) {
            (Some(macd), Some(signal)) => crossover_signals(macd, signal),
            _ => all_hold(&data),
        };
        data.with_signals(signals)
    }

    fn plot_config(&self) -> PlotConfig {
        PlotConfig::new(["macd", "macd_signal", "macd_hist"])
    }
}

// ─── Momentum threshold ───────────────────────────────────────────────────────

/// Buys while momentum is above `buy_threshold`, sells while it is below
/// `sell_threshold`.
#[derive(Debug, Clone)]
pub struct MomentumStrategy {
    indicator: MomentumIndicator,
    buy_threshold: f64,
    sell_threshold: f64,
}

impl MomentumStrategy {
    pub fn new(period: usize, buy_threshold: f64, sell_threshold: f64) -> Result<Self> {
        Ok(Self {
            indicator: MomentumIndicator::new(period)?,
            buy_threshold,
            sell_threshold,
        })
    }
}

impl Strategy for MomentumStrategy {
    fn kind(&self) -> &'static str {
        "momentum"
    }

    fn min_periods(&self) -> usize {
        self.indicator.min_periods()
    }

    fn calculate_indicators(&self, series: &Series) -> Series {
        let values = self.indicator.compute(&series.closes());
        series.clone().with_indicator("momentum", values)
    }

    fn generate_signals(&self, series: &Series) -> Series {
        if series.len() < self.min_periods() {
            return series.clone().with_signals(all_hold(series));
        }
        let data = self.calculate_indicators(series);
        let signals = data
            .indicator("momentum")
            .map(|values| {
                values
                    .iter()
                    .map(|v| match v {
                        Some(m) if *m > self.buy_threshold => Signal::Buy,
                        Some(m) if *m < self.sell_threshold => Signal::Sell,
                        _ => Signal::Hold,
                    })
                    .collect()
            })
            .unwrap_or_else(|| all_hold(&data));
        data.with_signals(signals)
    }

    fn plot_config(&self) -> PlotConfig {
        PlotConfig::new(["momentum"])
    }
}

// ─── RSI levels ───────────────────────────────────────────────────────────────

/// Buys at or below the oversold level, sells at or above overbought.
#[derive(Debug, Clone)]
pub struct RsiStrategy {
    indicator: RsiIndicator,
}

impl RsiStrategy {
    pub fn new(period: usize, overbought: f64, oversold: f64) -> Result<Self> {
        Ok(Self {
            indicator: RsiIndicator::new(period, overbought, oversold)?,
        })
    }
}

impl Strategy for RsiStrategy {
    fn kind(&self) -> &'static str {
        "rsi"
    }

    fn min_periods(&self) -> usize {
        self.indicator.min_periods()
    }

    fn calculate_indicators(&self, series: &Series) -> Series {
        let values = self.indicator.compute(&series.closes());
        series.clone().with_indicator("rsi", values)
    }

    fn generate_signals(&self, series: &Series) -> Series {
        if series.len() < self.min_periods() {
            return series.clone().with_signals(all_hold(series));
        }
        let data = self.calculate_indicators(series);
        let signals = data
            .indicator("rsi")
            .map(|values| {
                values
                    .iter()
                    .map(|v| match v {
                        Some(r) if *r <= self.indicator.oversold => Signal::Buy,
                        Some(r) if *r >= self.indicator.overbought => Signal::Sell,
                        _ => Signal::Hold,
                    })
                    .collect()
            })
            .unwrap_or_else(|| all_hold(&data));
        data.with_signals(signals)
    }

    fn plot_config(&self) -> PlotConfig {
        PlotConfig::new(["rsi"])
    }
}
