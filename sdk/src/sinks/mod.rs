pub mod file;
pub mod relational;
pub mod warehouse;

use crate::error::SinkError;
use crate::models::bid::BidEvent;
use async_trait::async_trait;
use std::fmt::{Debug, Formatter};

/// Storage medium materializing the bid stream.
///
/// `apply` must tolerate at-least-once delivery: the same event may be applied again
/// after a retryable failure or a restart before the offset commit.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, event: &BidEvent) -> Result<(), SinkError>;
}

impl Debug for dyn Sink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sink: {}", self.name())
    }
}

/// The schema allows any integer price, materialized rows never carry a negative one.
pub(crate) fn ensure_non_negative_price(event: &BidEvent) -> Result<(), SinkError> {
    if event.price() < 0 {
        return Err(SinkError::Fatal(format!(
            "negative price: {} for bidder: {}",
            event.price(),
            event.bidder_name()
        )));
    }

    Ok(())
}

/// Table and column identifiers are interpolated into SQL, so only plain names are accepted.
pub fn is_valid_identifier(identifier: &str) -> bool {
    let mut chars = identifier.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }

    identifier.len() <= 63
        && chars.all(|char| char.is_ascii_alphanumeric() || char == '_' || char == '.')
}
