pub mod chart;
pub mod pipeline;
pub mod task;
pub mod trigger_log;

pub use chart::{ChartRenderer, SvgChartDrawer};
pub use pipeline::{strategy_id, RunOutcome, StrategyRunner};
pub use task::StrategyTask;
pub use trigger_log::{TriggerLog, TriggerSink};
