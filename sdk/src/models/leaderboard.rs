use crate::models::bid::BidEvent;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A row of the transactional `bid` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub name: String,
    pub price: i64,
    pub bid_ts: String,
}

impl From<&BidEvent> for LeaderboardRow {
    fn from(event: &BidEvent) -> Self {
        LeaderboardRow {
            name: event.bidder_name().to_string(),
            price: event.price(),
            bid_ts: event.bid_timestamp().to_string(),
        }
    }
}

impl Display for LeaderboardRow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bid {} at {}", self.name, self.price, self.bid_ts)
    }
}
