use crate::error::{AuctionError, SinkError};
use crate::models::bid::BidEvent;
use crate::sinks::{ensure_non_negative_price, is_valid_identifier, Sink};
use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::{debug, info, warn};

pub const DEFAULT_TABLE: &str = "bid";

/// Opens a pool through the `any` driver: `postgres://` in production, `sqlite:` otherwise.
pub async fn connect(url: &str, max_connections: u32) -> Result<AnyPool, AuctionError> {
    sqlx::any::install_default_drivers();
    let mut options = AnyPoolOptions::new().max_connections(max_connections.max(1));
    if url.starts_with("sqlite::memory:") {
        options = options.idle_timeout(None).max_lifetime(None);
    }
    let pool = options.connect(url).await?;
    Ok(pool)
}

/// Creates the bid table when it does not exist yet. No key or uniqueness constraint:
/// redelivered events may be inserted more than once.
pub async fn ensure_table(pool: &AnyPool, table: &str) -> Result<(), AuctionError> {
    if !is_valid_identifier(table) {
        return Err(AuctionError::InvalidConfiguration(format!(
            "invalid table name: {table}"
        )));
    }

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (name TEXT NOT NULL, price BIGINT NOT NULL, bid_ts TEXT NOT NULL)"
    ))
    .execute(pool)
    .await?;
    info!("Ensured table: {table} exists.");
    Ok(())
}

/// Inserts one row per bid into the transactional table.
///
/// Several instances may write to the same table concurrently.
#[derive(Debug, Clone)]
pub struct RelationalSink {
    name: String,
    pool: AnyPool,
    table: String,
    insert_query: String,
}

impl RelationalSink {
    pub fn new(name: &str, pool: AnyPool, table: &str) -> Result<Self, AuctionError> {
        if !is_valid_identifier(table) {
            return Err(AuctionError::InvalidConfiguration(format!(
                "invalid table name: {table}"
            )));
        }

        Ok(RelationalSink {
            name: name.to_string(),
            pool,
            table: table.to_string(),
            insert_query: format!("INSERT INTO {table} (name, price, bid_ts) VALUES ($1, $2, $3)"),
        })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn rows_count(&self) -> Result<i64, AuctionError> {
        let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl Sink for RelationalSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, event: &BidEvent) -> Result<(), SinkError> {
        ensure_non_negative_price(event)?;
        sqlx::query(&self.insert_query)
            .bind(event.bidder_name().to_string())
            .bind(event.price())
            .bind(event.bid_timestamp().to_string())
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        debug!("Sink: {} inserted bid: {event}", self.name);
        Ok(())
    }
}

/// Connectivity problems are worth another attempt, anything the database itself rejects is not.
fn classify(error: sqlx::Error) -> SinkError {
    let retryable = match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(database_error) => database_error
            .code()
            .is_some_and(|code| is_transient_code(&code)),
        _ => false,
    };

    if retryable {
        warn!("Transient database failure: {error}");
        SinkError::Retryable(error.to_string())
    } else {
        SinkError::Fatal(error.to_string())
    }
}

fn is_transient_code(code: &str) -> bool {
    // Postgres: connection exceptions, admin shutdown, serialization and deadlock failures.
    if code.starts_with("08") || matches!(code, "57P01" | "57P03" | "40001" | "40P01") {
        return true;
    }

    // SQLite: busy and locked, including their extended codes.
    !code.starts_with('0')
        && code
            .parse::<u32>()
            .is_ok_and(|code| code < 4096 && matches!(code & 0xff, 5 | 6))
}
