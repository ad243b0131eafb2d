#![allow(dead_code)]

use auction::broker::memory::MemoryBroker;
use auction::consumer::retry::RetryPolicy;
use auction::consumer::runner::{ConsumerConfig, ConsumerRunner, RunnerReport};
use auction::error::{AuctionError, SinkError};
use auction::leaderboard::LeaderboardReader;
use auction::models::bid::BidEvent;
use auction::producer::EventProducer;
use auction::schema::descriptor::AUCTION_VALUE_SUBJECT;
use auction::schema::registry::{load_validator, StaticSchemaRegistry};
use auction::schema::validator::SchemaValidator;
use auction::sinks::relational::{connect, ensure_table, RelationalSink, DEFAULT_TABLE};
use auction::sinks::Sink;
use auction::utils::duration::AuctionDuration;
use async_trait::async_trait;
use sqlx::AnyPool;
use std::future::Future;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TOPIC: &str = "auction";

static LOGGING: Once = Once::new();

pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Embedded broker, bundled schema, producer and an in-memory transactional store.
pub struct PipelineSetup {
    pub broker: Arc<MemoryBroker>,
    pub validator: SchemaValidator,
    pub producer: EventProducer,
    pub pool: AnyPool,
    pub reader: LeaderboardReader,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<Result<RunnerReport, AuctionError>>>,
}

impl PipelineSetup {
    pub async fn init(partitions_count: u32) -> PipelineSetup {
        init_logging();
        let broker = Arc::new(MemoryBroker::new(partitions_count));
        broker.create_topic(TOPIC, partitions_count).unwrap();
        let registry = StaticSchemaRegistry::bundled().unwrap();
        let validator = load_validator(&registry, AUCTION_VALUE_SUBJECT, Some(1))
            .await
            .unwrap();
        let producer = EventProducer::builder(broker.clone(), validator.clone())
            .topic(TOPIC)
            .build();
        let pool = connect("sqlite::memory:", 1).await.unwrap();
        ensure_table(&pool, DEFAULT_TABLE).await.unwrap();
        let reader = LeaderboardReader::new(pool.clone(), DEFAULT_TABLE).unwrap();

        PipelineSetup {
            broker,
            validator,
            producer,
            pool,
            reader,
            shutdown: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn relational_sink(&self, name: &str) -> Arc<RelationalSink> {
        Arc::new(RelationalSink::new(name, self.pool.clone(), DEFAULT_TABLE).unwrap())
    }

    pub async fn subscribe(&self, group: &str, sink: Arc<dyn Sink>) -> ConsumerRunner {
        ConsumerRunner::subscribe(
            self.broker.as_ref(),
            TOPIC,
            group,
            consumer_config(),
            self.validator.clone(),
            sink,
        )
        .await
        .unwrap()
    }

    pub fn spawn(&mut self, runner: ConsumerRunner) {
        self.handles
            .push(tokio::spawn(runner.run(self.shutdown.clone())));
    }

    pub async fn start(&mut self, group: &str, sink: Arc<dyn Sink>) {
        let runner = self.subscribe(group, sink).await;
        self.spawn(runner);
    }

    pub fn committed_offset(&self, group: &str, partition_id: u32) -> u64 {
        self.broker
            .committed_offset(TOPIC, group, partition_id)
            .unwrap()
    }

    pub async fn stop(self) -> Vec<RunnerReport> {
        self.shutdown.cancel();
        let mut reports = Vec::new();
        for handle in self.handles {
            reports.push(handle.await.unwrap().unwrap());
        }
        reports
    }
}

pub fn consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        batch_size: 10,
        poll_timeout: AuctionDuration::from_millis(20),
        retry: RetryPolicy {
            initial_delay: AuctionDuration::from_millis(5),
            multiplier: 2.0,
            max_delay: AuctionDuration::from_millis(20),
            max_attempts: None,
        },
    }
}

pub fn bid_payload(name: &str, price: i64, bid_ts: &str) -> Vec<u8> {
    serde_json::json!({ "name": name, "price": price, "bid_ts": bid_ts })
        .to_string()
        .into_bytes()
}

pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was not met in time");
}

/// Records what reached it, in apply order.
#[derive(Default)]
pub struct RecordingSink {
    name: String,
    applied: Mutex<Vec<BidEvent>>,
}

impl RecordingSink {
    pub fn new(name: &str) -> Self {
        RecordingSink {
            name: name.to_string(),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn applied(&self) -> Vec<BidEvent> {
        self.applied.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, event: &BidEvent) -> Result<(), SinkError> {
        self.applied.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Applies to the inner sink, then reports a transient failure once, as if the
/// acknowledgement was lost after the write.
pub struct LostAckSink {
    inner: Arc<dyn Sink>,
    lost: Mutex<bool>,
}

impl LostAckSink {
    pub fn new(inner: Arc<dyn Sink>) -> Self {
        LostAckSink {
            inner,
            lost: Mutex::new(false),
        }
    }
}

#[async_trait]
impl Sink for LostAckSink {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn apply(&self, event: &BidEvent) -> Result<(), SinkError> {
        self.inner.apply(event).await?;
        let mut lost = self.lost.lock().unwrap();
        if !*lost {
            *lost = true;
            return Err(SinkError::Retryable("acknowledgement lost".to_string()));
        }
        Ok(())
    }
}
