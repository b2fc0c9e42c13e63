use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use common::{Error, Result, Signal, TriggerEvent};

/// Where the pipeline records trigger events.
///
/// Implementations are shared by every worker and must serialise concurrent
/// appends themselves.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    /// Record `event`. Returns `false` when an identical
    /// `(trigger_time, symbol, interval, strategy)` row already exists and
    /// nothing was written.
    async fn append(&self, event: &TriggerEvent) -> Result<bool>;

    /// Newest logged trigger time for the key, if any.
    async fn latest(&self, symbol: &str, interval: &str, strategy: &str) -> Result<Option<DateTime<Utc>>>;
}

/// Append-only trigger log in SQLite.
///
/// Timestamps are stored as fixed-width RFC 3339 text in UTC so that text
/// ordering matches time ordering.
#[derive(Clone)]
pub struct TriggerLog {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct TriggerRow {
    timestamp: String,
    symbol: String,
    interval: String,
    strategy: String,
    signal: String,
    chart_path: String,
}

impl TriggerRow {
    fn into_event(self) -> Result<TriggerEvent> {
        Ok(TriggerEvent {
            trigger_time: parse_timestamp(&self.timestamp)?,
            symbol: self.symbol,
            interval: self.interval,
            strategy: self.strategy,
            signal: self.signal.parse::<Signal>()?,
            chart_path: self.chart_path,
        })
    }
}

impl TriggerLog {
    /// Open (creating if needed) the database at `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new().max_connections(4).connect(url).await?;
        let log = Self::from_pool(pool).await?;
        info!(url, "Trigger log database initialised");
        Ok(log)
    }

    /// Private in-memory database, for tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        // every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Ok(Self { pool })
    }

    /// Most recent triggers first, at most `limit` of them.
    pub async fn query(&self, limit: u32) -> Result<Vec<TriggerEvent>> {
        let rows: Vec<TriggerRow> = sqlx::query_as(
            r#"
            SELECT timestamp, symbol, interval, strategy, signal, chart_path
            FROM triggers
            ORDER BY timestamp DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TriggerRow::into_event).collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TriggerSink for TriggerLog {
    async fn append(&self, event: &TriggerEvent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO triggers (timestamp, symbol, interval, strategy, signal, chart_path)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(format_timestamp(event.trigger_time))
        .bind(&event.symbol)
        .bind(&event.interval)
        .bind(&event.strategy)
        .bind(event.signal.to_string())
        .bind(&event.chart_path)
        .execute(&self.pool)
        .await?;

        let written = result.rows_affected() == 1;
        if written {
            info!(
                symbol = %event.symbol,
                interval = %event.interval,
                strategy = %event.strategy,
                signal = %event.signal,
                "Trigger logged"
            );
        }
        Ok(written)
    }

    async fn latest(&self, symbol: &str, interval: &str, strategy: &str) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<String> = sqlx::query_scalar(
            r#"
            SELECT MAX(timestamp) FROM triggers
            WHERE symbol = ?1 AND interval = ?2 AND strategy = ?3
            "#,
        )
        .bind(symbol)
        .bind(interval)
        .bind(strategy)
        .fetch_one(&self.pool)
        .await?;

        latest.as_deref().map(parse_timestamp).transpose()
    }
}

fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("bad trigger timestamp '{s}': {e}")))
}
