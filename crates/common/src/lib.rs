pub mod config;
pub mod error;
pub mod market;
pub mod storage;
pub mod types;

pub use config::{Config, JobConfig, Platform, QuantsFileConfig, SchedulerSection};
pub use error::{Error, Result};
pub use market::MarketDataProvider;
pub use storage::SeriesStore;
pub use types::*;
