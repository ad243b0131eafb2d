use crate::broker::{PublishAck, StreamBroker};
use crate::error::AuctionError;
use crate::models::bid::BidEvent;
use crate::schema::validator::SchemaValidator;
use crate::schema::wire;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{debug, error, warn};

pub const DEFAULT_TOPIC: &str = "auction";

/// How published bids are spread over the topic's partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Partitioning {
    /// Keyed by bidder name: a single bidder's events keep their relative order.
    #[default]
    ByBidder,
    /// Unkeyed: ordering holds only within a partition.
    Balanced,
}

/// Publishes schema-validated bids to a single topic.
///
/// Errors are surfaced to the caller classified as retryable or fatal; nothing is retried here.
#[derive(Debug, Clone)]
pub struct EventProducer {
    broker: Arc<dyn StreamBroker>,
    validator: SchemaValidator,
    topic: String,
    partitioning: Partitioning,
}

impl EventProducer {
    pub fn builder(broker: Arc<dyn StreamBroker>, validator: SchemaValidator) -> EventProducerBuilder {
        EventProducerBuilder::new(broker, validator)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    /// Validates a raw payload and publishes the resulting event.
    ///
    /// A payload violating the schema never reaches the broker.
    pub async fn publish_raw(&self, raw_payload: &[u8]) -> Result<PublishAck, AuctionError> {
        let event = self.validator.validate(raw_payload).inspect_err(|violation| {
            warn!("Rejected bid payload: {violation}");
        })?;
        self.publish(&event).await
    }

    pub async fn publish(&self, event: &BidEvent) -> Result<PublishAck, AuctionError> {
        let payload = self.validator.serialize(event)?;
        self.validator.validate(&payload)?;
        let framed = wire::encode(self.validator.schema_id(), &payload);
        let key = match self.partitioning {
            Partitioning::ByBidder => Some(event.partition_key()),
            Partitioning::Balanced => None,
        };

        match self.broker.publish(&self.topic, key, framed).await {
            Ok(ack) => {
                debug!("Published bid: {event} at {ack}");
                Ok(ack)
            }
            Err(publish_error) => {
                error!(
                    "Failed to publish bid: {event} to topic: {}: {publish_error}",
                    self.topic
                );
                Err(publish_error.into())
            }
        }
    }
}

#[derive(Debug)]
pub struct EventProducerBuilder {
    broker: Arc<dyn StreamBroker>,
    validator: SchemaValidator,
    topic: String,
    partitioning: Partitioning,
}

impl EventProducerBuilder {
    fn new(broker: Arc<dyn StreamBroker>, validator: SchemaValidator) -> Self {
        Self {
            broker,
            validator,
            topic: DEFAULT_TOPIC.to_string(),
            partitioning: Partitioning::default(),
        }
    }

    pub fn topic(self, topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            ..self
        }
    }

    pub fn partitioning(self, partitioning: Partitioning) -> Self {
        Self {
            partitioning,
            ..self
        }
    }

    pub fn build(self) -> EventProducer {
        EventProducer {
            broker: self.broker,
            validator: self.validator,
            topic: self.topic,
            partitioning: self.partitioning,
        }
    }
}
