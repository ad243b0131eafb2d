use crate::broker::consumer_group::ConsumerGroup;
use crate::broker::{ConsumedRecord, PublishAck, StreamBroker, Subscription};
use crate::error::{AuctionError, PublishError};
use crate::utils::hash;
use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_PARTITIONS_COUNT: u32 = 3;

#[derive(Debug)]
struct StoredRecord {
    offset: u64,
    key: Option<Bytes>,
    payload: Bytes,
}

#[derive(Debug)]
struct Partition {
    partition_id: u32,
    records: RwLock<Vec<StoredRecord>>,
    consumer_offsets: DashMap<String, u64>,
}

impl Partition {
    fn new(partition_id: u32) -> Self {
        Partition {
            partition_id,
            records: RwLock::new(Vec::new()),
            consumer_offsets: DashMap::new(),
        }
    }

    async fn append(&self, key: Option<Bytes>, payload: Bytes) -> u64 {
        let mut records = self.records.write().await;
        let offset = records.len() as u64;
        records.push(StoredRecord {
            offset,
            key,
            payload,
        });
        offset
    }

    async fn current_offset(&self) -> u64 {
        self.records.read().await.len() as u64
    }

    async fn get_messages_by_offset(&self, offset: u64, count: usize) -> Vec<ConsumedRecord> {
        let records = self.records.read().await;
        let start = (offset as usize).min(records.len());
        records[start..]
            .iter()
            .take(count)
            .map(|record| ConsumedRecord {
                partition_id: self.partition_id,
                offset: record.offset,
                key: record.key.clone(),
                payload: record.payload.clone(),
            })
            .collect()
    }

    fn get_consumer_offset(&self, group: &str) -> u64 {
        self.consumer_offsets
            .get(group)
            .map(|offset| *offset)
            .unwrap_or(0)
    }

    async fn store_consumer_offset(&self, group: &str, offset: u64) -> Result<(), AuctionError> {
        let current = self.current_offset().await;
        trace!(
            "Storing offset: {} for group: {}, partition: {}, current: {}...",
            offset,
            group,
            self.partition_id,
            current
        );
        if offset > current {
            return Err(AuctionError::InvalidOffset {
                partition_id: self.partition_id,
                offset,
                current,
            });
        }

        self.consumer_offsets
            .entry(group.to_string())
            .and_modify(|stored| {
                if offset > *stored {
                    *stored = offset;
                }
            })
            .or_insert(offset);
        Ok(())
    }
}

#[derive(Debug)]
struct Topic {
    name: String,
    partitions: Vec<Partition>,
    consumer_groups: RwLock<AHashMap<String, ConsumerGroup>>,
    current_partition_id: AtomicU32,
    appended: Notify,
}

impl Topic {
    fn new(name: &str, partitions_count: u32) -> Self {
        Topic {
            name: name.to_string(),
            partitions: (1..=partitions_count).map(Partition::new).collect(),
            consumer_groups: RwLock::new(AHashMap::new()),
            current_partition_id: AtomicU32::new(1),
            appended: Notify::new(),
        }
    }

    fn get_partitions_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    fn get_partition(&self, partition_id: u32) -> Result<&Partition, AuctionError> {
        partition_id
            .checked_sub(1)
            .and_then(|index| self.partitions.get(index as usize))
            .ok_or_else(|| AuctionError::PartitionNotFound(partition_id, self.name.clone()))
    }

    fn get_next_partition_id(&self) -> u32 {
        let mut partition_id = self.current_partition_id.fetch_add(1, Ordering::SeqCst);
        let partitions_count = self.get_partitions_count();
        if partition_id > partitions_count {
            partition_id = 1;
            self.current_partition_id
                .swap(partition_id + 1, Ordering::SeqCst);
        }
        trace!("Next partition ID: {}", partition_id);
        partition_id
    }

    fn calculate_partition_id_by_messages_key_hash(&self, messages_key: &[u8]) -> u32 {
        let messages_key_hash = hash::calculate_32(messages_key);
        let partitions_count = self.get_partitions_count();
        let mut partition_id = messages_key_hash % partitions_count;
        if partition_id == 0 {
            partition_id = partitions_count;
        }
        trace!(
            "Calculated partition ID: {} for messages key: {:?}, hash: {}",
            partition_id,
            messages_key,
            messages_key_hash
        );
        partition_id
    }
}

/// In-process partitioned log with consumption groups.
///
/// Records live for the lifetime of the process. Topics are created on first use
/// with the broker's default partition count unless created explicitly.
#[derive(Debug)]
pub struct MemoryBroker {
    partitions_count: u32,
    topics: DashMap<String, Arc<Topic>>,
    next_member_id: AtomicU32,
    available: AtomicBool,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        MemoryBroker::new(DEFAULT_PARTITIONS_COUNT)
    }
}

impl MemoryBroker {
    pub fn new(partitions_count: u32) -> Self {
        MemoryBroker {
            partitions_count: partitions_count.max(1),
            topics: DashMap::new(),
            next_member_id: AtomicU32::new(1),
            available: AtomicBool::new(true),
        }
    }

    pub fn create_topic(&self, name: &str, partitions_count: u32) -> Result<(), AuctionError> {
        if partitions_count == 0 {
            return Err(AuctionError::InvalidConfiguration(format!(
                "topic: {name} needs at least one partition"
            )));
        }

        self.topics
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("Creating topic: {name} with {partitions_count} partition(s)");
                Arc::new(Topic::new(name, partitions_count))
            });
        Ok(())
    }

    /// Simulates a broker outage: publishes fail with a retryable error while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        warn!("Broker availability changed to: {available}");
    }

    pub fn partitions_count(&self, topic: &str) -> Option<u32> {
        self.topics
            .get(topic)
            .map(|topic| topic.get_partitions_count())
    }

    pub fn committed_offset(
        &self,
        topic: &str,
        group: &str,
        partition_id: u32,
    ) -> Result<u64, AuctionError> {
        let topic = self.get_topic(topic)?;
        let partition = topic.get_partition(partition_id)?;
        Ok(partition.get_consumer_offset(group))
    }

    pub async fn messages_count(&self, topic: &str) -> Result<u64, AuctionError> {
        let topic = self.get_topic(topic)?;
        let mut count = 0;
        for partition in &topic.partitions {
            count += partition.current_offset().await;
        }
        Ok(count)
    }

    fn get_topic(&self, name: &str) -> Result<Arc<Topic>, AuctionError> {
        self.topics
            .get(name)
            .map(|topic| topic.value().clone())
            .ok_or_else(|| AuctionError::TopicNotFound(name.to_string()))
    }

    fn get_or_create_topic(&self, name: &str) -> Arc<Topic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(
                    "Creating topic: {name} with {} partition(s)",
                    self.partitions_count
                );
                Arc::new(Topic::new(name, self.partitions_count))
            })
            .value()
            .clone()
    }
}

#[async_trait]
impl StreamBroker for MemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: Bytes,
    ) -> Result<PublishAck, PublishError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(PublishError::Retryable("broker is unavailable".to_string()));
        }

        if payload.is_empty() {
            return Err(PublishError::Fatal("empty payload".to_string()));
        }

        let topic = self.get_or_create_topic(topic);
        let partition_id = match key {
            Some(key) => topic.calculate_partition_id_by_messages_key_hash(key),
            None => topic.get_next_partition_id(),
        };
        let partition = topic
            .get_partition(partition_id)
            .map_err(|error| PublishError::Fatal(error.to_string()))?;
        let offset = partition
            .append(key.map(Bytes::copy_from_slice), payload)
            .await;
        topic.appended.notify_waiters();
        debug!(
            "Appended record at offset: {offset} to partition: {partition_id} of topic: {}",
            topic.name
        );
        Ok(PublishAck {
            topic: topic.name.clone(),
            partition_id,
            offset,
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, AuctionError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(AuctionError::Broker("broker is unavailable".to_string()));
        }

        let topic = self.get_or_create_topic(topic);
        let member_id = self.next_member_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut consumer_groups = topic.consumer_groups.write().await;
            consumer_groups
                .entry(group.to_string())
                .or_insert_with(|| {
                    ConsumerGroup::new(&topic.name, group, topic.get_partitions_count())
                })
                .add_member(member_id);
        }
        topic.appended.notify_waiters();
        info!(
            "Member with ID: {member_id} joined consumer group: {group} on topic: {}",
            topic.name
        );
        Ok(Box::new(MemorySubscription {
            topic,
            group: group.to_string(),
            member_id,
            generation: 0,
            positions: AHashMap::new(),
            paused: AHashSet::new(),
            closed: false,
        }))
    }
}

#[derive(Debug)]
pub struct MemorySubscription {
    topic: Arc<Topic>,
    group: String,
    member_id: u32,
    generation: u64,
    positions: AHashMap<u32, u64>,
    paused: AHashSet<u32>,
    closed: bool,
}

impl MemorySubscription {
    async fn fetch(&mut self, max_records: usize) -> Result<Vec<ConsumedRecord>, AuctionError> {
        let partition_ids = {
            let mut consumer_groups = self.topic.consumer_groups.write().await;
            let Some(consumer_group) = consumer_groups.get_mut(&self.group) else {
                return Err(AuctionError::ConsumerGroupMemberNotFound(
                    self.member_id,
                    self.group.clone(),
                ));
            };
            if consumer_group.generation() != self.generation {
                debug!(
                    "Consumer group: {} was rebalanced, member with ID: {} reloads its offsets.",
                    self.group, self.member_id
                );
                self.generation = consumer_group.generation();
                self.positions.clear();
            }
            consumer_group.calculate_partition_ids(self.member_id)?
        };

        let mut records = Vec::new();
        for partition_id in partition_ids {
            if records.len() >= max_records {
                break;
            }

            if self.paused.contains(&partition_id) {
                continue;
            }

            let partition = self.topic.get_partition(partition_id)?;
            let position = match self.positions.get(&partition_id) {
                Some(position) => *position,
                None => partition.get_consumer_offset(&self.group),
            };
            let fetched = partition
                .get_messages_by_offset(position, max_records - records.len())
                .await;
            let next_position = fetched
                .last()
                .map(|record| record.offset + 1)
                .unwrap_or(position);
            self.positions.insert(partition_id, next_position);
            records.extend(fetched);
        }
        Ok(records)
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn group(&self) -> &str {
        &self.group
    }

    async fn poll(
        &mut self,
        max_records: u32,
        timeout: Duration,
    ) -> Result<Vec<ConsumedRecord>, AuctionError> {
        if self.closed {
            return Err(AuctionError::SubscriptionClosed);
        }

        let deadline = Instant::now() + timeout;
        let topic = self.topic.clone();
        loop {
            let appended = topic.appended.notified();
            let records = self.fetch(max_records.max(1) as usize).await?;
            if !records.is_empty() {
                return Ok(records);
            }

            tokio::select! {
                _ = appended => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    async fn commit(&mut self, partition_id: u32, next_offset: u64) -> Result<(), AuctionError> {
        if self.closed {
            return Err(AuctionError::SubscriptionClosed);
        }

        self.topic
            .get_partition(partition_id)?
            .store_consumer_offset(&self.group, next_offset)
            .await
    }

    async fn pause(&mut self, partition_id: u32) -> Result<(), AuctionError> {
        self.topic.get_partition(partition_id)?;
        self.paused.insert(partition_id);
        warn!(
            "Member with ID: {} of consumer group: {} paused partition: {partition_id}",
            self.member_id, self.group
        );
        Ok(())
    }

    async fn assigned_partitions(&self) -> Result<Vec<u32>, AuctionError> {
        let consumer_groups = self.topic.consumer_groups.read().await;
        consumer_groups
            .get(&self.group)
            .ok_or_else(|| {
                AuctionError::ConsumerGroupMemberNotFound(self.member_id, self.group.clone())
            })?
            .get_member_partitions(self.member_id)
    }

    async fn close(&mut self) -> Result<(), AuctionError> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;
        {
            let mut consumer_groups = self.topic.consumer_groups.write().await;
            if let Some(consumer_group) = consumer_groups.get_mut(&self.group) {
                consumer_group.delete_member(self.member_id);
            }
        }
        self.topic.appended.notify_waiters();
        info!(
            "Member with ID: {} left consumer group: {} on topic: {}",
            self.member_id, self.group, self.topic.name
        );
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        match self.topic.consumer_groups.try_write() {
            Ok(mut consumer_groups) => {
                if let Some(consumer_group) = consumer_groups.get_mut(&self.group) {
                    consumer_group.delete_member(self.member_id);
                }
                self.topic.appended.notify_waiters();
            }
            Err(_) => warn!(
                "Member with ID: {} of consumer group: {} was dropped without leaving the group.",
                self.member_id, self.group
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "bids";
    const TIMEOUT: Duration = Duration::from_millis(200);

    async fn publish_n(broker: &MemoryBroker, count: u32, key: Option<&[u8]>) {
        for i in 0..count {
            broker
                .publish(TOPIC, key, Bytes::from(format!("record-{i}")))
                .await
                .unwrap();
        }
    }

    async fn drain(subscription: &mut Box<dyn Subscription>) -> Vec<ConsumedRecord> {
        let mut all = Vec::new();
        loop {
            let records = subscription.poll(100, Duration::from_millis(50)).await.unwrap();
            if records.is_empty() {
                return all;
            }
            for record in &records {
                subscription
                    .commit(record.partition_id, record.offset + 1)
                    .await
                    .unwrap();
            }
            all.extend(records);
        }
    }

    #[tokio::test]
    async fn given_messages_key_records_should_be_appended_to_the_same_partition() {
        let broker = MemoryBroker::new(3);
        let mut partitions = AHashSet::new();
        for _ in 0..100 {
            let ack = broker
                .publish(TOPIC, Some(b"alice"), Bytes::from_static(b"x"))
                .await
                .unwrap();
            partitions.insert(ack.partition_id);
        }
        assert_eq!(partitions.len(), 1);
    }

    #[tokio::test]
    async fn backlogged_partition_should_not_starve_the_others() {
        let broker = MemoryBroker::new(2);
        publish_n(&broker, 20, None).await;
        let mut subscription = broker.subscribe(TOPIC, "group").await.unwrap();

        let mut polled_partitions = Vec::new();
        for _ in 0..4 {
            let records = subscription.poll(1, TIMEOUT).await.unwrap();
            assert_eq!(records.len(), 1);
            polled_partitions.push(records[0].partition_id);
        }

        assert!(polled_partitions.contains(&1));
        assert!(polled_partitions.contains(&2));
        assert_ne!(polled_partitions[0], polled_partitions[1]);
    }

    #[tokio::test]
    async fn unkeyed_records_should_be_spread_using_round_robin() {
        let broker = MemoryBroker::new(3);
        let mut partition_ids = Vec::new();
        for _ in 0..6 {
            let ack = broker
                .publish(TOPIC, None, Bytes::from_static(b"x"))
                .await
                .unwrap();
            partition_ids.push(ack.partition_id);
        }
        assert_eq!(partition_ids, vec![1, 2, 3, 1, 2, 3]);
    }

    #[tokio::test]
    async fn offsets_should_grow_per_partition() {
        let broker = MemoryBroker::new(1);
        let first = broker
            .publish(TOPIC, None, Bytes::from_static(b"a"))
            .await
            .unwrap();
        let second = broker
            .publish(TOPIC, None, Bytes::from_static(b"b"))
            .await
            .unwrap();
        assert_eq!((first.offset, second.offset), (0, 1));
    }

    #[tokio::test]
    async fn distinct_groups_should_each_receive_every_record() {
        let broker = MemoryBroker::new(3);
        let mut relational = broker.subscribe(TOPIC, "relational").await.unwrap();
        let mut file = broker.subscribe(TOPIC, "file").await.unwrap();
        publish_n(&broker, 30, None).await;

        assert_eq!(drain(&mut relational).await.len(), 30);
        assert_eq!(drain(&mut file).await.len(), 30);
    }

    #[tokio::test]
    async fn members_of_the_same_group_should_split_partitions() {
        let broker = MemoryBroker::new(4);
        let mut first = broker.subscribe(TOPIC, "relational").await.unwrap();
        let mut second = broker.subscribe(TOPIC, "relational").await.unwrap();
        let first_partitions = first.assigned_partitions().await.unwrap();
        let second_partitions = second.assigned_partitions().await.unwrap();
        assert_eq!(first_partitions.len(), 2);
        assert_eq!(second_partitions.len(), 2);
        assert!(first_partitions
            .iter()
            .all(|partition_id| !second_partitions.contains(partition_id)));

        publish_n(&broker, 40, None).await;
        let first_records = drain(&mut first).await;
        let second_records = drain(&mut second).await;
        assert_eq!(first_records.len() + second_records.len(), 40);
        assert!(first_records
            .iter()
            .all(|record| first_partitions.contains(&record.partition_id)));
    }

    #[tokio::test]
    async fn records_should_be_delivered_in_partition_order() {
        let broker = MemoryBroker::new(2);
        let mut subscription = broker.subscribe(TOPIC, "ordered").await.unwrap();
        publish_n(&broker, 20, Some(b"bob")).await;
        let records = drain(&mut subscription).await;
        let offsets = records.iter().map(|record| record.offset).collect::<Vec<_>>();
        assert_eq!(offsets, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn poll_should_time_out_with_no_records() {
        let broker = MemoryBroker::new(1);
        let mut subscription = broker.subscribe(TOPIC, "idle").await.unwrap();
        let started = Instant::now();
        let records = subscription.poll(10, TIMEOUT).await.unwrap();
        assert!(records.is_empty());
        assert!(started.elapsed() >= TIMEOUT);
    }

    #[tokio::test]
    async fn poll_should_wake_up_on_publish() {
        let broker = Arc::new(MemoryBroker::new(1));
        let mut subscription = broker.subscribe(TOPIC, "waiting").await.unwrap();
        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher
                .publish(TOPIC, None, Bytes::from_static(b"late"))
                .await
                .unwrap();
        });
        let records = subscription.poll(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, Bytes::from_static(b"late"));
    }

    #[tokio::test]
    async fn committed_offset_should_never_move_backwards() {
        let broker = MemoryBroker::new(1);
        let mut subscription = broker.subscribe(TOPIC, "group").await.unwrap();
        publish_n(&broker, 5, None).await;
        subscription.commit(1, 4).await.unwrap();
        subscription.commit(1, 2).await.unwrap();
        assert_eq!(broker.committed_offset(TOPIC, "group", 1).unwrap(), 4);
    }

    #[tokio::test]
    async fn commit_beyond_the_log_should_fail() {
        let broker = MemoryBroker::new(1);
        let mut subscription = broker.subscribe(TOPIC, "group").await.unwrap();
        publish_n(&broker, 2, None).await;
        let result = subscription.commit(1, 3).await;
        assert!(matches!(result, Err(AuctionError::InvalidOffset { .. })));
    }

    #[tokio::test]
    async fn unavailable_broker_should_fail_publish_with_retryable_error() {
        let broker = MemoryBroker::new(1);
        broker.set_available(false);
        let result = broker
            .publish(TOPIC, None, Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(PublishError::Retryable(_))));
        broker.set_available(true);
        assert!(broker
            .publish(TOPIC, None, Bytes::from_static(b"x"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn paused_partition_should_not_be_delivered() {
        let broker = MemoryBroker::new(1);
        let mut subscription = broker.subscribe(TOPIC, "group").await.unwrap();
        publish_n(&broker, 3, None).await;
        subscription.pause(1).await.unwrap();
        let records = subscription
            .poll(10, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn new_member_should_resume_from_committed_offset_after_member_leaves() {
        let broker = MemoryBroker::new(1);
        let mut first = broker.subscribe(TOPIC, "group").await.unwrap();
        publish_n(&broker, 5, None).await;
        let records = first.poll(2, TIMEOUT).await.unwrap();
        assert_eq!(records.len(), 2);
        first.commit(1, 2).await.unwrap();
        first.close().await.unwrap();

        let mut second = broker.subscribe(TOPIC, "group").await.unwrap();
        let records = drain(&mut second).await;
        let offsets = records.iter().map(|record| record.offset).collect::<Vec<_>>();
        assert_eq!(offsets, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn uncommitted_records_should_be_redelivered_to_the_next_member() {
        let broker = MemoryBroker::new(1);
        let mut first = broker.subscribe(TOPIC, "group").await.unwrap();
        publish_n(&broker, 3, None).await;
        assert_eq!(first.poll(10, TIMEOUT).await.unwrap().len(), 3);
        drop(first);

        let mut second = broker.subscribe(TOPIC, "group").await.unwrap();
        assert_eq!(drain(&mut second).await.len(), 3);
    }

    #[tokio::test]
    async fn closed_subscription_should_not_poll() {
        let broker = MemoryBroker::new(1);
        let mut subscription = broker.subscribe(TOPIC, "group").await.unwrap();
        subscription.close().await.unwrap();
        assert!(matches!(
            subscription.poll(1, TIMEOUT).await,
            Err(AuctionError::SubscriptionClosed)
        ));
    }
}
