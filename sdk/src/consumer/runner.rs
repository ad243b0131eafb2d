use crate::broker::{ConsumedRecord, StreamBroker, Subscription};
use crate::consumer::retry::RetryPolicy;
use crate::error::{AuctionError, SinkError};
use crate::models::bid::BidEvent;
use crate::schema::validator::SchemaValidator;
use crate::schema::wire;
use crate::sinks::Sink;
use crate::utils::duration::AuctionDuration;
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub batch_size: u32,
    #[serde_as(as = "DisplayFromStr")]
    pub poll_timeout: AuctionDuration,
    pub retry: RetryPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            batch_size: 100,
            poll_timeout: AuctionDuration::from_millis(1_000),
            retry: RetryPolicy::default(),
        }
    }
}

/// A partition stopped on an event its sink could not apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaltedPartition {
    pub partition_id: u32,
    pub offset: u64,
    pub error: String,
}

impl Display for HaltedPartition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "partition: {} halted at offset: {}: {}",
            self.partition_id, self.offset, self.error
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerReport {
    pub sink: String,
    pub group: String,
    pub applied: u64,
    pub retries: u64,
    pub halted: Vec<HaltedPartition>,
}

impl Display for RunnerReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sink: {}, group: {}, applied: {}, retries: {}, halted partitions: {}",
            self.sink,
            self.group,
            self.applied,
            self.retries,
            self.halted.len()
        )
    }
}

enum Outcome {
    Applied,
    Halted(String),
    Interrupted,
}

/// Drives one sink from one consumption group.
///
/// An offset is committed only after its event was applied. Retryable failures are
/// retried in place with backoff; fatal ones pause the partition, which stays blocked
/// until an operator steps in.
pub struct ConsumerRunner {
    topic: String,
    config: ConsumerConfig,
    validator: SchemaValidator,
    sink: Arc<dyn Sink>,
    subscription: Box<dyn Subscription>,
}

impl std::fmt::Debug for ConsumerRunner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRunner")
            .field("topic", &self.topic)
            .field("group", &self.subscription.group())
            .field("sink", &self.sink.name())
            .finish()
    }
}

impl ConsumerRunner {
    /// Joins the group; partitions are assigned from this point on.
    pub async fn subscribe(
        broker: &dyn StreamBroker,
        topic: &str,
        group: &str,
        config: ConsumerConfig,
        validator: SchemaValidator,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, AuctionError> {
        let subscription = broker.subscribe(topic, group).await?;
        info!(
            "Sink: {} subscribed to topic: {topic} as consumer group: {group}",
            sink.name()
        );
        Ok(ConsumerRunner {
            topic: topic.to_string(),
            config,
            validator,
            sink,
            subscription,
        })
    }

    pub fn group(&self) -> &str {
        self.subscription.group()
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub async fn assigned_partitions(&self) -> Result<Vec<u32>, AuctionError> {
        self.subscription.assigned_partitions().await
    }

    /// Consumes until `shutdown` is cancelled, then leaves the group.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<RunnerReport, AuctionError> {
        let mut report = RunnerReport {
            sink: self.sink.name().to_string(),
            group: self.subscription.group().to_string(),
            ..Default::default()
        };
        let result = self.consume(&shutdown, &mut report).await;
        if let Err(error) = self.subscription.close().await {
            warn!(
                "Sink: {} failed to leave consumer group: {}: {error}",
                report.sink, report.group
            );
        }

        info!("Consumer runner stopped, {report}");
        result.map(|_| report)
    }

    async fn consume(
        &mut self,
        shutdown: &CancellationToken,
        report: &mut RunnerReport,
    ) -> Result<(), AuctionError> {
        let poll_timeout = self.config.poll_timeout.get_duration();
        let mut halted = AHashSet::new();
        loop {
            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                polled = self.subscription.poll(self.config.batch_size, poll_timeout) => polled,
            };

            let records = match polled {
                Ok(records) => records,
                Err(AuctionError::SubscriptionClosed) => return Err(AuctionError::SubscriptionClosed),
                Err(error) => {
                    error!(
                        group = %report.group,
                        sink = %report.sink,
                        "Failed to poll topic: {}: {error}",
                        self.topic
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(poll_timeout) => continue,
                    }
                }
            };

            for record in records {
                if halted.contains(&record.partition_id) {
                    continue;
                }

                match self.process(&record, shutdown, report).await {
                    Outcome::Applied => {
                        report.applied += 1;
                        self.commit(&record).await;
                    }
                    Outcome::Halted(reason) => {
                        error!(
                            group = %report.group,
                            sink = %report.sink,
                            partition_id = record.partition_id,
                            offset = record.offset,
                            "Halting partition on an event that cannot be applied: {reason}"
                        );
                        halted.insert(record.partition_id);
                        report.halted.push(HaltedPartition {
                            partition_id: record.partition_id,
                            offset: record.offset,
                            error: reason,
                        });
                        if let Err(error) = self.subscription.pause(record.partition_id).await {
                            error!(
                                "Failed to pause partition: {} for group: {}: {error}",
                                record.partition_id, report.group
                            );
                        }
                    }
                    Outcome::Interrupted => return Ok(()),
                }

                if shutdown.is_cancelled() {
                    return Ok(());
                }
            }
        }
    }

    async fn commit(&mut self, record: &ConsumedRecord) {
        let next_offset = record.offset + 1;
        match self
            .subscription
            .commit(record.partition_id, next_offset)
            .await
        {
            Ok(()) => debug!(
                "Committed offset: {next_offset} for partition: {} of group: {}",
                record.partition_id,
                self.subscription.group()
            ),
            // The event stays applied; it is delivered again after a restart.
            Err(error) => warn!(
                "Failed to commit offset: {next_offset} for partition: {} of group: {}: {error}",
                record.partition_id,
                self.subscription.group()
            ),
        }
    }

    fn decode(&self, record: &ConsumedRecord) -> Result<BidEvent, AuctionError> {
        let (schema_id, payload) = wire::decode(&record.payload)?;
        if schema_id != self.validator.schema_id() {
            return Err(AuctionError::UnknownSchemaId(schema_id));
        }

        Ok(self.validator.validate(payload)?)
    }

    async fn process(
        &self,
        record: &ConsumedRecord,
        shutdown: &CancellationToken,
        report: &mut RunnerReport,
    ) -> Outcome {
        let event = match self.decode(record) {
            Ok(event) => event,
            Err(error) => return Outcome::Halted(error.to_string()),
        };

        let mut attempt = 1;
        loop {
            let reason = match self.sink.apply(&event).await {
                Ok(()) => return Outcome::Applied,
                Err(SinkError::Fatal(reason)) => return Outcome::Halted(reason),
                Err(SinkError::Retryable(reason)) => reason,
            };

            if !self.config.retry.allows_retry(attempt) {
                return Outcome::Halted(format!(
                    "giving up after {attempt} attempt(s): {reason}"
                ));
            }

            let delay = self.config.retry.delay(attempt);
            warn!(
                sink = %report.sink,
                partition_id = record.partition_id,
                offset = record.offset,
                "Attempt: {attempt} to apply bid: {event} failed, retrying in {delay}: {reason}"
            );
            report.retries += 1;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Outcome::Interrupted,
                _ = tokio::time::sleep(delay.get_duration()) => {}
            }
            attempt += 1;
        }
    }
}
