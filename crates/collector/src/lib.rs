pub mod binance;
pub mod coingecko;
pub mod collector;
pub mod storage;

pub use binance::BinanceClient;
pub use coingecko::CoinGeckoClient;
pub use collector::DataCollector;
pub use storage::CsvStore;
