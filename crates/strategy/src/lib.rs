pub mod config;
pub mod indicators;
pub mod registry;
pub mod strategies;

pub use config::{StrategyConfig, StrategyFileConfig};
pub use registry::{build_strategy, StrategyRegistry};
pub use strategies::{MacdStrategy, MomentumStrategy, RsiStrategy};

use chrono::{DateTime, Utc};
use common::{Series, Signal};

/// Indicator columns a chart of this strategy's output should draw.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlotConfig {
    pub indicator_columns: Vec<String>,
}

impl PlotConfig {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            indicator_columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Result of evaluating a strategy against the latest data.
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    /// True iff the signal on the last row is not `Hold`.
    pub trigger: bool,
    pub signal: Signal,
    /// Open time of the last row; `None` for an empty series.
    pub trigger_time: Option<DateTime<Utc>>,
    /// Input rows with indicator and signal columns attached.
    pub data: Series,
}

/// All strategy implementations must satisfy this trait.
///
/// Implementations are pure: the input series is borrowed immutably and a new
/// series carrying the extra columns is returned, so a cached strategy can be
/// shared by every scheduled job that names it.
pub trait Strategy: Send + Sync {
    /// Strategy type identifier ("macd", "momentum", ...).
    fn kind(&self) -> &'static str;

    /// Fewest rows the strategy needs before it can emit anything but `Hold`.
    fn min_periods(&self) -> usize;

    /// Append this strategy's indicator columns.
    fn calculate_indicators(&self, series: &Series) -> Series;

    /// Append indicator columns plus a `signal` column. Series shorter than
    /// `min_periods` come back with every row on `Hold`.
    fn generate_signals(&self, series: &Series) -> Series;

    fn plot_config(&self) -> PlotConfig;

    /// Generate signals and report whether the last row fires.
    fn run(&self, series: &Series) -> StrategyOutcome {
        let data = self.generate_signals(series);
        let signal = data.last_signal();
        StrategyOutcome {
            trigger: signal.is_actionable(),
            signal,
            trigger_time: data.last_open_time(),
            data,
        }
    }
}
