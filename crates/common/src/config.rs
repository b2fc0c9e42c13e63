use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Process configuration read from environment variables at startup.
/// Loads `.env` if present.
#[derive(Debug, Clone)]
pub struct Config {
    // Provider credentials (public market-data endpoints work without them)
    pub binance_api_key: Option<String>,
    pub coingecko_api_key: Option<String>,

    // Storage
    pub data_path: PathBuf,
    pub database_url: String,

    // Config file paths
    pub quants_config_path: String,
    pub strategy_config_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let data_path = PathBuf::from(optional_env("DATA_PATH").unwrap_or_else(|| "data".into()));
        let database_url = optional_env("DATABASE_URL").unwrap_or_else(|| {
            format!(
                "sqlite://{}?mode=rwc",
                data_path.join("trigger_log.db").display()
            )
        });

        Ok(Config {
            binance_api_key: optional_env("BINANCE_API_KEY"),
            coingecko_api_key: optional_env("COINGECKO_API_KEY"),
            data_path,
            database_url,
            quants_config_path: optional_env("QUANTS_CONFIG_PATH")
                .unwrap_or_else(|| "config/quants.toml".to_string()),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
        })
    }

    pub fn charts_dir(&self) -> PathBuf {
        self.data_path.join("charts")
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Which market-data provider feeds the collection jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Binance,
    Coingecko,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Binance => write!(f, "binance"),
            Platform::Coingecko => write!(f, "coingecko"),
        }
    }
}

/// Collection and scheduling config file (TOML).
///
/// Example `config/quants.toml`:
/// ```toml
/// platform = "binance"
/// kline_intervals = ["1h", "4h"]
/// symbols = ["BTCUSDT", "ETHUSDT"]
/// lookback_days = 1
///
/// [scheduler]
/// max_workers = 10
/// tick_ms = 1000
///
/// [[job]]
/// strategy = "macd_default"
/// symbols = ["BTCUSDT"]
/// interval = "1h"
/// every = "5m"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuantsFileConfig {
    #[serde(default)]
    pub platform: Platform,
    /// Kline intervals to collect. Each one doubles as the collection cadence.
    pub kline_intervals: Vec<String>,
    /// Symbols to collect; empty means every tradable symbol on the provider.
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    /// Offset applied to timestamps drawn on charts.
    #[serde(default)]
    pub chart_utc_offset_hours: i32,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerSection {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            tick_ms: default_tick_ms(),
        }
    }
}

/// Binds one configured strategy to the data of `interval` for each symbol,
/// evaluated on the `every` cadence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobConfig {
    /// Name of a `[[strategy]]` entry in the strategy config file.
    pub strategy: String,
    pub symbols: Vec<String>,
    /// Kline interval of the stored data the strategy reads.
    pub interval: String,
    /// Evaluation cadence, e.g. "30s" or "5m".
    pub every: String,
}

/// Upper bound on `lookback_days`, well inside what `chrono::Duration` holds.
pub const MAX_LOOKBACK_DAYS: i64 = 3_650;

fn default_lookback_days() -> i64 {
    1
}

fn default_max_workers() -> usize {
    10
}

fn default_tick_ms() -> u64 {
    1000
}

impl QuantsFileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("failed to parse '{}': {e}", path.display())))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        if cfg.scheduler.max_workers == 0 {
            return Err(Error::Config("scheduler.max_workers must be > 0".into()));
        }
        if cfg.scheduler.tick_ms == 0 {
            return Err(Error::Config("scheduler.tick_ms must be > 0".into()));
        }
        if !(1..=MAX_LOOKBACK_DAYS).contains(&cfg.lookback_days) {
            return Err(Error::Config(format!(
                "lookback_days must be between 1 and {MAX_LOOKBACK_DAYS}"
            )));
        }
        cfg.chart_offset()?;
        Ok(cfg)
    }

    /// `chart_utc_offset_hours` as a chrono offset; must lie strictly within a day.
    pub fn chart_offset(&self) -> Result<FixedOffset> {
        self.chart_utc_offset_hours
            .checked_mul(3_600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                Error::Config(format!(
                    "chart_utc_offset_hours out of range: {}",
                    self.chart_utc_offset_hours
                ))
            })
    }

    /// Whether `interval` is one of the kline intervals being collected.
    pub fn collects(&self, interval: &str) -> bool {
        self.kline_intervals.iter().any(|i| i == interval)
    }
}
