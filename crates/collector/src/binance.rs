use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

use common::{Candle, Error, MarketDataProvider, Result};

const BASE_URL: &str = "https://api.binance.com";
/// Largest page `/api/v3/klines` returns.
const KLINES_PAGE_LIMIT: usize = 1000;

/// Public market-data client for Binance spot. Candles and the tradable
/// symbol universe only; nothing here needs a signed request.
pub struct BinanceClient {
    api_key: Option<String>,
    base_url: String,
    http: Client,
}

impl BinanceClient {
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
        let req = self.http.get(format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => req.header("X-MBX-APIKEY", key),
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

    /// One page of klines starting at `start_ms`.
    async fn klines_page(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>> {
        let req = self.get("/api/v3/klines").query(&[
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("startTime", start_ms.to_string()),
            ("endTime", end_ms.to_string()),
            ("limit", KLINES_PAGE_LIMIT.to_string()),
        ]);
        let body = self.fetch(req).await?;
        parse_klines(&body)
    }

    /// Every page between `start` and `end`, following `startTime`.
    pub async fn historical_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let end_ms = end.timestamp_millis();
        let mut start_ms = start.timestamp_millis();
        let mut candles = Vec::new();

        while start_ms <= end_ms {
            let page = self.klines_page(symbol, interval, start_ms, end_ms).await?;
            let full = page.len() == KLINES_PAGE_LIMIT;
            let Some(last) = page.last() else { break };
            start_ms = last.open_time.timestamp_millis() + 1;
            candles.extend(page);
            if !full {
                break;
            }
        }

        debug!(symbol, interval, rows = candles.len(), "Fetched Binance klines");
        Ok(candles)
    }

    /// Symbols quoted in USDT whose status is TRADING.
    pub async fn usdt_pairs(&self) -> Result<Vec<String>> {
        let body = self.fetch(self.get("/api/v3/exchangeInfo")).await?;
        let info: ExchangeInfo = serde_json::from_str(&body)?;
        Ok(usdt_trading_symbols(info))
    }
}

#[async_trait]
impl MarketDataProvider for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Candle> {
        match self.historical_klines(symbol, interval, start, end).await {
            Ok(candles) => candles,
            Err(e) => {
                error!(symbol, interval, error = %e, "Failed to fetch historical klines");
                Vec::new()
            }
        }
    }

    async fn get_symbols(&self) -> Vec<String> {
        match self.usdt_pairs().await {
            Ok(pairs) => {
                info!(count = pairs.len(), "Retrieved USDT trading pairs");
                pairs
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch USDT trading pairs");
                Vec::new()
            }
        }
    }
}

// ─── Response parsing ─────────────────────────────────────────────────────────

/// Klines arrive as positional arrays:
/// `[open_time, "open", "high", "low", "close", "volume", close_time, ...]`.
fn parse_klines(body: &str) -> Result<Vec<Candle>> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)?;
    rows.iter().map(|row| parse_kline(row)).collect()
}

fn parse_kline(row: &[Value]) -> Result<Candle> {
    if row.len() < 7 {
        return Err(Error::Exchange(format!(
            "kline row has {} fields, expected at least 7",
            row.len()
        )));
    }
    Ok(Candle {
        open_time: millis(&row[0])?,
        open: decimal(&row[1])?,
        high: decimal(&row[2])?,
        low: decimal(&row[3])?,
        close: decimal(&row[4])?,
        volume: decimal(&row[5])?,
        close_time: millis(&row[6])?,
    })
}

fn millis(v: &Value) -> Result<DateTime<Utc>> {
    v.as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| Error::Exchange(format!("bad kline timestamp: {v}")))
}

// Binance sends prices as strings to keep precision.
fn decimal(v: &Value) -> Result<f64> {
    match v {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| Error::Exchange(format!("bad kline number '{s}': {e}"))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::Exchange(format!("bad kline number: {n}"))),
        other => Err(Error::Exchange(format!("bad kline number: {other}"))),
    }
}

fn usdt_trading_symbols(info: ExchangeInfo) -> Vec<String> {
    info.symbols
        .into_iter()
        .filter(|s| s.symbol.ends_with("USDT") && s.status == "TRADING")
        .map(|s| s.symbol)
        .collect()
}

#[derive(Deserialize)]
struct ExchangeInfo {
    #[serde(default)]
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
struct SymbolInfo {
    symbol: String,
    status: String,
}
