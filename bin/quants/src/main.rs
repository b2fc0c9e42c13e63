use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use collector::{BinanceClient, CoinGeckoClient, CsvStore, DataCollector};
use common::{Config, MarketDataProvider, Platform, QuantsFileConfig};
use runner::{StrategyRunner, StrategyTask, SvgChartDrawer, TriggerLog};
use scheduler::{task_fn, SchedulerConfig, TaskScheduler};
use strategy::{StrategyFileConfig, StrategyRegistry};

const RECENT_TRIGGERS: u32 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("failed to read environment")?;
    let quants = QuantsFileConfig::load(&cfg.quants_config_path)?;
    let strategy_file = StrategyFileConfig::load(&cfg.strategy_config_path)?;
    info!(platform = %quants.platform, data_path = %cfg.data_path.display(), "Quants starting");

    std::fs::create_dir_all(&cfg.data_path)
        .with_context(|| format!("failed to create {}", cfg.data_path.display()))?;

    // ── Collaborators ─────────────────────────────────────────────────────────
    let provider: Arc<dyn MarketDataProvider> = match quants.platform {
        Platform::Binance => Arc::new(BinanceClient::new(cfg.binance_api_key.clone())?),
        Platform::Coingecko => Arc::new(CoinGeckoClient::new(cfg.coingecko_api_key.clone())?),
    };
    let store = Arc::new(CsvStore::new(&cfg.data_path));
    let collector = Arc::new(DataCollector::new(
        provider,
        store.clone(),
        quants.symbols.clone(),
        quants.lookback_days,
    ));

    let trigger_log = Arc::new(
        TriggerLog::connect(&cfg.database_url)
            .await
            .context("failed to open trigger log")?,
    );
    let charts = Arc::new(SvgChartDrawer::new(cfg.charts_dir(), quants.chart_offset()?));

    // ── Strategies ────────────────────────────────────────────────────────────
    let registry = Arc::new(StrategyRegistry::from_config(&strategy_file));
    info!(strategies = ?registry.available(), "Strategies loaded");

    let runner = Arc::new(StrategyRunner::new(
        store,
        registry.clone(),
        charts,
        trigger_log.clone(),
    ));

    // ── Scheduler ─────────────────────────────────────────────────────────────
    let sched = TaskScheduler::new(SchedulerConfig {
        max_workers: quants.scheduler.max_workers,
        tick: Duration::from_millis(quants.scheduler.tick_ms),
    });

    for interval in &quants.kline_intervals {
        let task = {
            let collector = collector.clone();
            let interval = interval.clone();
            task_fn(move || {
                let collector = collector.clone();
                let interval = interval.clone();
                async move {
                    collector.update_data_for_interval(&interval).await;
                }
            })
        }
        .with_arg("interval", interval);
        // a bad entry fails its own registration only
        if let Err(e) = sched.add_task(format!("update_data_{interval}"), interval, task).await {
            error!(interval = %interval, error = %e, "Skipping data collection job");
        }
    }

    for job in &quants.jobs {
        if registry.get(&job.strategy).is_none() {
            error!(strategy = %job.strategy, "Unknown strategy in job config, skipping");
            continue;
        }
        if !quants.collects(&job.interval) {
            warn!(
                strategy = %job.strategy,
                interval = %job.interval,
                collected = ?quants.kline_intervals,
                "Job reads an interval that is not collected; it will find no data"
            );
        }
        for symbol in &job.symbols {
            let task = StrategyTask::new(runner.clone(), &job.strategy, symbol, &job.interval);
            let name = task.job_name();
            if let Err(e) = sched.add_task(name.clone(), &job.every, task).await {
                error!(task = %name, error = %e, "Skipping strategy job");
            }
        }
    }

    let tasks = sched.get_tasks().await;
    if tasks.is_empty() {
        warn!("No jobs registered");
    }
    for (name, task) in &tasks {
        info!(task = %name, interval = %task.interval, args = ?task.args, "Registered job");
    }

    // ── Initial collection ────────────────────────────────────────────────────
    for interval in &quants.kline_intervals {
        collector.update_data_for_interval(interval).await;
    }

    match trigger_log.query(RECENT_TRIGGERS).await {
        Ok(recent) => {
            for t in recent {
                info!(
                    time = %t.trigger_time,
                    symbol = %t.symbol,
                    interval = %t.interval,
                    strategy = %t.strategy,
                    signal = %t.signal,
                    chart = %t.chart_path,
                    "Recent trigger"
                );
            }
        }
        Err(e) => warn!(error = %e, "Could not read recent triggers"),
    }

    // ── Run until Ctrl-C ──────────────────────────────────────────────────────
    sched.run().await;
    info!(jobs = tasks.len(), "Scheduler running. Waiting for shutdown signal.");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received, draining running jobs");

    sched.stop().await;
    trigger_log.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// `RUST_LOG` sets the filter (default `info`). `LOG_FORMAT=json` switches to
/// structured JSON lines.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
