use crate::broker::{ConsumedRecord, KafkaConfig, PublishAck, StreamBroker, Subscription};
use crate::error::{AuctionError, PublishError};
use ahash::AHashSet;
use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const FOLLOW_UP_RECEIVE_TIMEOUT: Duration = Duration::from_millis(5);

/// Broker adapter for an external Kafka cluster.
pub struct KafkaBroker {
    config: KafkaConfig,
    producer: FutureProducer,
}

impl std::fmt::Debug for KafkaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBroker")
            .field("bootstrap_servers", &self.config.bootstrap_servers)
            .finish()
    }
}

impl KafkaBroker {
    pub fn new(config: KafkaConfig) -> Result<Self, AuctionError> {
        let producer = client_config(&config)
            .set("acks", &config.acks)
            .set(
                "message.timeout.ms",
                config.message_timeout.as_millis().to_string(),
            )
            .create::<FutureProducer>()
            .map_err(|error| AuctionError::Broker(error.to_string()))?;
        info!(
            "Created Kafka producer for: {} using: {}",
            config.bootstrap_servers, config.security_protocol
        );
        Ok(KafkaBroker { config, producer })
    }
}

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("security.protocol", &config.security_protocol);
    if config.security_protocol.starts_with("SASL") {
        client_config.set("sasl.mechanisms", &config.sasl_mechanism);
        if let Some(username) = &config.sasl_username {
            client_config.set("sasl.username", username);
        }
        if let Some(password) = &config.sasl_password {
            client_config.set("sasl.password", password);
        }
    }
    client_config
}

fn classify(error: KafkaError) -> PublishError {
    let retryable = matches!(
        error.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::MessageTimedOut
                | RDKafkaErrorCode::QueueFull
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::NotLeaderForPartition
                | RDKafkaErrorCode::LeaderNotAvailable
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::NotEnoughReplicas
                | RDKafkaErrorCode::NotEnoughReplicasAfterAppend
        )
    );
    if retryable {
        PublishError::Retryable(error.to_string())
    } else {
        PublishError::Fatal(error.to_string())
    }
}

#[async_trait]
impl StreamBroker for KafkaBroker {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: Bytes,
    ) -> Result<PublishAck, PublishError> {
        let mut record = FutureRecord::<[u8], [u8]>::to(topic).payload(payload.as_ref());
        if let Some(key) = key {
            record = record.key(key);
        }

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.config.message_timeout.get_duration()))
            .await
            .map_err(|(error, _)| classify(error))?;
        Ok(PublishAck {
            topic: topic.to_string(),
            partition_id: partition as u32,
            offset: offset as u64,
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, AuctionError> {
        let consumer = client_config(&self.config)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create::<StreamConsumer>()
            .map_err(|error| AuctionError::Broker(error.to_string()))?;
        consumer
            .subscribe(&[topic])
            .map_err(|error| AuctionError::Broker(error.to_string()))?;
        info!("Joined consumer group: {group} on Kafka topic: {topic}");
        Ok(Box::new(KafkaSubscription {
            topic: topic.to_string(),
            group: group.to_string(),
            consumer: Arc::new(consumer),
            paused: AHashSet::new(),
        }))
    }
}

pub struct KafkaSubscription {
    topic: String,
    group: String,
    consumer: Arc<StreamConsumer>,
    paused: AHashSet<u32>,
}

impl KafkaSubscription {
    fn accept(&self, message: &impl Message) -> Option<ConsumedRecord> {
        let partition_id = message.partition() as u32;
        if self.paused.contains(&partition_id) {
            return None;
        }

        Some(ConsumedRecord {
            partition_id,
            offset: message.offset() as u64,
            key: message.key().map(Bytes::copy_from_slice),
            payload: Bytes::copy_from_slice(message.payload().unwrap_or_default()),
        })
    }
}

#[async_trait]
impl Subscription for KafkaSubscription {
    fn group(&self) -> &str {
        &self.group
    }

    async fn poll(
        &mut self,
        max_records: u32,
        timeout: Duration,
    ) -> Result<Vec<ConsumedRecord>, AuctionError> {
        let mut records = Vec::new();
        let mut wait = timeout;
        while records.len() < max_records.max(1) as usize {
            let message = match tokio::time::timeout(wait, self.consumer.recv()).await {
                Ok(Ok(message)) => message,
                Ok(Err(error)) => {
                    error!("Failed to receive from Kafka topic: {}: {error}", self.topic);
                    return Err(AuctionError::Broker(error.to_string()));
                }
                Err(_) => break,
            };
            if let Some(record) = self.accept(&message) {
                records.push(record);
                wait = FOLLOW_UP_RECEIVE_TIMEOUT;
            }
        }
        Ok(records)
    }

    async fn commit(&mut self, partition_id: u32, next_offset: u64) -> Result<(), AuctionError> {
        let mut partitions = TopicPartitionList::new();
        partitions
            .add_partition_offset(
                &self.topic,
                partition_id as i32,
                Offset::Offset(next_offset as i64),
            )
            .map_err(|error| AuctionError::Broker(error.to_string()))?;
        // Synchronous commits block until the coordinator answers.
        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&partitions, CommitMode::Sync))
            .await
            .map_err(|error| AuctionError::Broker(error.to_string()))?
            .map_err(|error| AuctionError::Broker(error.to_string()))
    }

    async fn pause(&mut self, partition_id: u32) -> Result<(), AuctionError> {
        let mut partitions = TopicPartitionList::new();
        partitions.add_partition(&self.topic, partition_id as i32);
        self.consumer
            .pause(&partitions)
            .map_err(|error| AuctionError::Broker(error.to_string()))?;
        self.paused.insert(partition_id);
        warn!(
            "Consumer group: {} paused partition: {partition_id} of topic: {}",
            self.group, self.topic
        );
        Ok(())
    }

    async fn assigned_partitions(&self) -> Result<Vec<u32>, AuctionError> {
        let assignment = self
            .consumer
            .assignment()
            .map_err(|error| AuctionError::Broker(error.to_string()))?;
        Ok(assignment
            .elements()
            .iter()
            .map(|element| element.partition() as u32)
            .collect())
    }

    async fn close(&mut self) -> Result<(), AuctionError> {
        self.consumer.unsubscribe();
        info!(
            "Left consumer group: {} on Kafka topic: {}",
            self.group, self.topic
        );
        Ok(())
    }
}
