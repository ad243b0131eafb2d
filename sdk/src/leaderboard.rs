use crate::error::AuctionError;
use crate::models::leaderboard::LeaderboardRow;
use crate::sinks::is_valid_identifier;
use sqlx::{AnyPool, Row};
use tracing::trace;

/// Point read of the current highest bid from the transactional table.
///
/// Reflects only what the relational sink has already committed; nothing is cached.
#[derive(Debug, Clone)]
pub struct LeaderboardReader {
    pool: AnyPool,
    query: String,
}

impl LeaderboardReader {
    pub fn new(pool: AnyPool, table: &str) -> Result<Self, AuctionError> {
        if !is_valid_identifier(table) {
            return Err(AuctionError::InvalidConfiguration(format!(
                "invalid table name: {table}"
            )));
        }

        Ok(LeaderboardReader {
            pool,
            query: format!(
                "SELECT name, price, bid_ts FROM {table} ORDER BY price DESC, bid_ts DESC LIMIT 1"
            ),
        })
    }

    /// Highest price wins, ties go to the latest bid. `None` until the first row lands.
    pub async fn highest_bid(&self) -> Result<Option<LeaderboardRow>, AuctionError> {
        let row = sqlx::query(&self.query)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            trace!("Leaderboard is empty.");
            return Ok(None);
        };

        Ok(Some(LeaderboardRow {
            name: row.try_get("name")?,
            price: row.try_get("price")?,
            bid_ts: row.try_get("bid_ts")?,
        }))
    }
}
