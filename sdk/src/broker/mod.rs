pub mod consumer_group;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

use crate::error::{AuctionError, PublishError};
use crate::utils::duration::AuctionDuration;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;

/// Connection contract of an external Kafka-compatible broker.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub security_protocol: String,
    pub sasl_mechanism: String,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub acks: String,
    #[serde_as(as = "DisplayFromStr")]
    pub message_timeout: AuctionDuration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        KafkaConfig {
            bootstrap_servers: "localhost:9092".to_string(),
            security_protocol: "SASL_SSL".to_string(),
            sasl_mechanism: "PLAIN".to_string(),
            sasl_username: None,
            sasl_password: None,
            acks: "all".to_string(),
            message_timeout: AuctionDuration::from_millis(30_000),
        }
    }
}

/// Broker confirmation of durable receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub topic: String,
    pub partition_id: u32,
    pub offset: u64,
}

impl Display for PublishAck {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "topic: {}, partition ID: {}, offset: {}",
            self.topic, self.partition_id, self.offset
        )
    }
}

/// A record delivered to a consumption group member, in partition order.
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    pub partition_id: u32,
    pub offset: u64,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

/// Publish/subscribe contract of the durable, partitioned log.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Appends the payload to the topic. Records sharing a key land on the same partition.
    async fn publish(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: Bytes,
    ) -> Result<PublishAck, PublishError>;

    /// Joins the named consumption group on the topic.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, AuctionError>;
}

impl Debug for dyn StreamBroker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamBroker")
    }
}

/// Membership of a single consumer in a consumption group.
#[async_trait]
pub trait Subscription: Send + Sync {
    fn group(&self) -> &str;

    /// Waits up to `timeout` for records on the assigned, non-paused partitions.
    async fn poll(
        &mut self,
        max_records: u32,
        timeout: Duration,
    ) -> Result<Vec<ConsumedRecord>, AuctionError>;

    /// Stores `next_offset` as the group's cursor for the partition.
    async fn commit(&mut self, partition_id: u32, next_offset: u64) -> Result<(), AuctionError>;

    /// Stops delivery from the partition for the rest of this membership.
    async fn pause(&mut self, partition_id: u32) -> Result<(), AuctionError>;

    async fn assigned_partitions(&self) -> Result<Vec<u32>, AuctionError>;

    /// Leaves the group so its partitions can be reassigned.
    async fn close(&mut self) -> Result<(), AuctionError>;
}
