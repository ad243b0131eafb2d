use crate::error::SchemaViolation;
use crate::utils::timestamp::BidTimestamp;
use serde::Serialize;
use std::fmt::{Display, Formatter};

pub const NAME_FIELD: &str = "name";
pub const PRICE_FIELD: &str = "price";
pub const BID_TS_FIELD: &str = "bid_ts";

/// A single "bid placed" event.
///
/// Immutable once built: consumers only project it into their own representations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BidEvent {
    #[serde(rename = "name")]
    bidder_name: String,
    price: i64,
    #[serde(rename = "bid_ts")]
    bid_timestamp: BidTimestamp,
}

impl BidEvent {
    pub fn new(
        bidder_name: &str,
        price: i64,
        bid_timestamp: BidTimestamp,
    ) -> Result<Self, SchemaViolation> {
        if bidder_name.trim().is_empty() {
            return Err(SchemaViolation::EmptyField(NAME_FIELD.to_string()));
        }

        Ok(BidEvent {
            bidder_name: bidder_name.to_string(),
            price,
            bid_timestamp,
        })
    }

    pub fn bidder_name(&self) -> &str {
        &self.bidder_name
    }

    pub fn price(&self) -> i64 {
        self.price
    }

    pub fn bid_timestamp(&self) -> BidTimestamp {
        self.bid_timestamp
    }

    /// Partition key keeping a single bidder's events in publish order.
    pub fn partition_key(&self) -> &[u8] {
        self.bidder_name.as_bytes()
    }
}

impl Display for BidEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ name: {}, price: {}, bid_ts: {} }}",
            self.bidder_name, self.price, self.bid_timestamp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_not_allow_empty_bidder_name() {
        let result = BidEvent::new("  ", 10, BidTimestamp::now());
        assert_eq!(
            result,
            Err(SchemaViolation::EmptyField(NAME_FIELD.to_string()))
        );
    }

    #[test]
    fn should_serialize_with_wire_field_names() {
        let event = BidEvent::new("alice", 100, "2024-01-01T00:00:00".parse().unwrap()).unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "alice", "price": 100, "bid_ts": "2024-01-01T00:00:00"})
        );
    }
}
