use crate::error::{AuctionError, SinkError};
use crate::models::bid::BidEvent;
use crate::models::leaderboard::LeaderboardRow;
use crate::sinks::{ensure_non_negative_price, is_valid_identifier, Sink};
use crate::utils::duration::AuctionDuration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Generic row insertion into an analytical store.
#[async_trait]
pub trait TabularInsert: Send + Sync {
    /// Checks the store is reachable; called once before the sink is enabled.
    async fn probe(&self) -> Result<(), AuctionError>;

    async fn insert_row(&self, table: &str, row: &LeaderboardRow) -> Result<(), SinkError>;
}

impl Debug for dyn TabularInsert {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TabularInsert")
    }
}

/// Projects bids into the analytical store. Optional infrastructure: see [`WarehouseSink::probe`].
#[derive(Debug)]
pub struct WarehouseSink {
    name: String,
    table: String,
    inserter: Arc<dyn TabularInsert>,
}

impl WarehouseSink {
    /// Returns the sink only when the store answers the startup probe.
    ///
    /// An unavailable store disables this sink alone; callers carry on without it.
    pub async fn probe(
        name: &str,
        table: &str,
        inserter: Arc<dyn TabularInsert>,
    ) -> Result<Option<Self>, AuctionError> {
        if !is_valid_identifier(table) {
            return Err(AuctionError::InvalidConfiguration(format!(
                "invalid warehouse table name: {table}"
            )));
        }

        if let Err(error) = inserter.probe().await {
            warn!("Warehouse for sink: {name} is unavailable, the sink is disabled: {error}");
            return Ok(None);
        }

        info!("Warehouse for sink: {name} is available, inserting into: {table}");
        Ok(Some(WarehouseSink {
            name: name.to_string(),
            table: table.to_string(),
            inserter,
        }))
    }
}

#[async_trait]
impl Sink for WarehouseSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, event: &BidEvent) -> Result<(), SinkError> {
        ensure_non_negative_price(event)?;
        self.inserter
            .insert_row(&self.table, &LeaderboardRow::from(event))
            .await?;
        debug!("Sink: {} inserted bid: {event}", self.name);
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde_as(as = "DisplayFromStr")]
    pub timeout: AuctionDuration,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        ClickHouseConfig {
            url: "http://localhost:8123".to_string(),
            database: "default".to_string(),
            username: "default".to_string(),
            password: String::new(),
            timeout: AuctionDuration::from_millis(5000),
        }
    }
}

/// Row inserts over the ClickHouse HTTP interface, one `JSONEachRow` line per bid.
#[derive(Debug)]
pub struct ClickHouseInserter {
    http: reqwest::Client,
    base_url: String,
    config: ClickHouseConfig,
}

impl ClickHouseInserter {
    pub fn new(config: ClickHouseConfig) -> Result<Self, AuctionError> {
        let mut builder = reqwest::Client::builder();
        if !config.timeout.is_zero() {
            builder = builder.timeout(config.timeout.get_duration());
        }
        Ok(ClickHouseInserter {
            http: builder.build()?,
            base_url: config.url.trim_end_matches('/').to_string(),
            config,
        })
    }

    /// Creates the table when missing; the engine orders rows by bid time.
    pub async fn ensure_table(&self, table: &str) -> Result<(), AuctionError> {
        if !is_valid_identifier(table) {
            return Err(AuctionError::InvalidConfiguration(format!(
                "invalid warehouse table name: {table}"
            )));
        }

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (name String, price Int64, bid_ts DateTime64(6)) ENGINE = MergeTree ORDER BY bid_ts"
        );
        self.exec(&sql, String::new()).await?;
        info!("Ensured warehouse table: {table} exists.");
        Ok(())
    }

    async fn exec(&self, query: &str, body: String) -> Result<String, SinkError> {
        let response = self
            .http
            .post(&self.base_url)
            .query(&[
                ("database", self.config.database.as_str()),
                ("date_time_input_format", "best_effort"),
                ("query", query),
            ])
            .header("X-ClickHouse-User", &self.config.username)
            .header("X-ClickHouse-Key", &self.config.password)
            .body(body)
            .send()
            .await
            .map_err(|error| SinkError::Retryable(format!("ClickHouse request: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| SinkError::Retryable(format!("ClickHouse response: {error}")))?;
        if status.is_success() {
            Ok(body)
        } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(SinkError::Retryable(format!("ClickHouse {status}: {body}")))
        } else {
            Err(SinkError::Fatal(format!("ClickHouse {status}: {body}")))
        }
    }
}

#[async_trait]
impl TabularInsert for ClickHouseInserter {
    async fn probe(&self) -> Result<(), AuctionError> {
        let response = self
            .http
            .get(format!("{}/ping", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        debug!(
            "ClickHouse ping answered: {}",
            response.text().await.unwrap_or_default().trim()
        );
        Ok(())
    }

    async fn insert_row(&self, table: &str, row: &LeaderboardRow) -> Result<(), SinkError> {
        let line = serde_json::to_string(row)
            .map_err(|error| SinkError::Fatal(format!("cannot serialize row: {error}")))?;
        self.exec(&format!("INSERT INTO {table} FORMAT JSONEachRow"), line)
            .await?;
        Ok(())
    }
}
