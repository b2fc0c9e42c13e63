use std::sync::Arc;

use async_trait::async_trait;

use scheduler::{Task, TaskArgs};

use crate::pipeline::StrategyRunner;

/// One scheduled evaluation of a strategy against a symbol/interval.
pub struct StrategyTask {
    runner: Arc<StrategyRunner>,
    strategy: String,
    symbol: String,
    interval: String,
}

impl StrategyTask {
    pub fn new(
        runner: Arc<StrategyRunner>,
        strategy: impl Into<String>,
        symbol: impl Into<String>,
        interval: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            strategy: strategy.into(),
            symbol: symbol.into(),
            interval: interval.into(),
        }
    }

    /// Scheduler job name: `<strategy>_<symbol>_<interval>`.
    pub fn job_name(&self) -> String {
        format!("{}_{}_{}", self.strategy, self.symbol, self.interval)
    }
}

#[async_trait]
impl Task for StrategyTask {
    async fn run(&self) {
        // the outcome is already logged by the runner
        let _ = self
            .runner
            .run_strategy(&self.strategy, &self.symbol, &self.interval)
            .await;
    }

    fn args(&self) -> TaskArgs {
        TaskArgs::from([
            ("strategy_name".to_string(), self.strategy.clone()),
            ("symbol".to_string(), self.symbol.clone()),
            ("interval".to_string(), self.interval.clone()),
        ])
    }
}
