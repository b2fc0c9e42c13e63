use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, error, info};

use common::{Candle, Error, MarketDataProvider, Result};

const BASE_URL: &str = "https://api.coingecko.com/api/v3";
const VS_CURRENCY: &str = "usd";
const MARKETS_PER_PAGE: u32 = 250;

/// CoinGecko market-data client. Symbols are CoinGecko coin ids
/// (`bitcoin`, `ethereum`, ...) priced against USD.
///
/// CoinGecko only publishes prices and volumes, so each point becomes a
/// candle with `open == high == low == close` and `close_time == open_time`.
/// Granularity is chosen by CoinGecko from the requested range; the
/// `interval` argument only names the storage key.
pub struct CoinGeckoClient {
    api_key: Option<String>,
    base_url: String,
    http: Client,
}

impl CoinGeckoClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            api_key,
            base_url: BASE_URL.to_string(),
            http,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let req = self
            .http
            .get(format!("{}{path}", self.base_url))
            .header("accept", "application/json");
        match &self.api_key {
            Some(key) => req.header("x-cg-demo-api-key", key),
            None => req,
        }
    }

    async fn fetch(&self, req: RequestBuilder) -> Result<String> {
        let resp = req.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    pub async fn market_chart_range(
        &self,
        coin_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let req = self
            .get(&format!("/coins/{coin_id}/market_chart/range"))
            .query(&[
                ("vs_currency", VS_CURRENCY.to_string()),
                ("from", start.timestamp().to_string()),
                ("to", end.timestamp().to_string()),
            ]);
        let body = self.fetch(req).await?;
        let chart: MarketChart = serde_json::from_str(&body)?;
        chart.into_candles()
    }

    /// Ids of the top coins by market cap (first page of `/coins/markets`).
    pub async fn coin_ids(&self) -> Result<Vec<String>> {
        let req = self.get("/coins/markets").query(&[
            ("vs_currency", VS_CURRENCY.to_string()),
            ("order", "market_cap_desc".to_string()),
            ("per_page", MARKETS_PER_PAGE.to_string()),
            ("page", "1".to_string()),
        ]);
        let body = self.fetch(req).await?;
        let coins: Vec<CoinMarket> = serde_json::from_str(&body)?;
        Ok(coins.into_iter().map(|c| c.id).collect())
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoClient {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Candle> {
        match self.market_chart_range(symbol, start, end).await {
            Ok(candles) => {
                debug!(symbol, interval, rows = candles.len(), "Fetched CoinGecko prices");
                candles
            }
            Err(e) => {
                error!(symbol, error = %e, "Failed to fetch historical price data");
                Vec::new()
            }
        }
    }

    async fn get_symbols(&self) -> Vec<String> {
        match self.coin_ids().await {
            Ok(ids) => {
                info!(count = ids.len(), "Retrieved coins");
                ids
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch coins");
                Vec::new()
            }
        }
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MarketChart {
    prices: Vec<(f64, f64)>,
    #[serde(default)]
    total_volumes: Vec<(f64, f64)>,
}

impl MarketChart {
    fn into_candles(self) -> Result<Vec<Candle>> {
        let volumes: std::collections::HashMap<i64, f64> = self
            .total_volumes
            .into_iter()
            .map(|(ts, v)| (ts as i64, v))
            .collect();

        self.prices
            .into_iter()
            .map(|(ts, price)| {
                let ms = ts as i64;
                let t = DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| Error::Exchange(format!("bad price timestamp: {ts}")))?;
                Ok(Candle {
                    open_time: t,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: volumes.get(&ms).copied().unwrap_or(0.0),
                    close_time: t,
                })
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct CoinMarket {
    id: String,
}
