use crate::configs::server::{
    BrokerConfig, BrokerKind, RelationalSinkConfig, SchemaRegistryConfig, SchemaRegistryKind,
    ServerConfig, WarehouseSinkConfig,
};
use crate::server_error::ServerError;
use auction::broker::memory::MemoryBroker;
use auction::broker::StreamBroker;
use auction::consumer::runner::{ConsumerConfig, ConsumerRunner, RunnerReport};
use auction::error::AuctionError;
use auction::leaderboard::LeaderboardReader;
use auction::models::leaderboard::LeaderboardRow;
use auction::producer::EventProducer;
use auction::schema::descriptor::AUCTION_VALUE_SCHEMA;
use auction::schema::registry::{
    load_validator, HttpSchemaRegistry, SchemaRegistry, StaticSchemaRegistry,
};
use auction::schema::validator::SchemaValidator;
use auction::sinks::file::FileSink;
use auction::sinks::relational::{self, RelationalSink};
use auction::sinks::warehouse::{ClickHouseInserter, WarehouseSink};
use auction::sinks::Sink;
use sqlx::AnyPool;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything `run` needs: the producer fed from the input and one subscribed
/// runner per sink instance.
#[derive(Debug)]
pub struct Pipeline {
    producer: EventProducer,
    reader: Option<LeaderboardReader>,
    runners: Vec<ConsumerRunner>,
    log_leaderboard: bool,
}

impl Pipeline {
    /// Builds every component from the configuration and subscribes all runners
    /// before the first bid can be published.
    pub async fn assemble(config: &ServerConfig) -> Result<Self, ServerError> {
        let broker = create_broker(&config.broker)?;
        let registry = create_registry(&config.schema_registry).await?;
        let validator = load_validator(
            registry.as_ref(),
            &config.schema_registry.subject,
            config.schema_registry.version,
        )
        .await?;

        let producer = EventProducer::builder(broker.clone(), validator.clone())
            .topic(&config.broker.topic)
            .partitioning(config.producer.partitioning)
            .build();

        let topic = config.broker.topic.as_str();
        let subscriber = Subscriber {
            broker: broker.as_ref(),
            topic,
            consumer: &config.consumer,
            validator: &validator,
        };
        let mut runners = Vec::new();
        let mut reader = None;

        let relational_config = &config.sinks.relational;
        if relational_config.enabled {
            let pool = open_relational(relational_config).await?;
            for instance in 1..=relational_config.instances {
                let sink = RelationalSink::new(
                    &format!("relational-{instance}"),
                    pool.clone(),
                    &relational_config.table,
                )?;
                runners.push(
                    subscriber
                        .subscribe(&relational_config.group, Arc::new(sink))
                        .await?,
                );
            }
            reader = Some(LeaderboardReader::new(pool, &relational_config.table)?);
        } else {
            warn!("Relational sink is disabled, the leaderboard is unavailable.");
        }

        let file_config = &config.sinks.file;
        if file_config.enabled {
            let path = Path::new(&file_config.path);
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let sink = FileSink::open("file", path).await?;
            runners.push(subscriber.subscribe(&file_config.group, Arc::new(sink)).await?);
        }

        if let Some(sink) = create_warehouse_sink(&config.sinks.warehouse).await? {
            runners.push(
                subscriber
                    .subscribe(&config.sinks.warehouse.group, Arc::new(sink))
                    .await?,
            );
        }

        if runners.is_empty() {
            warn!("No sink is enabled, published bids will not be applied anywhere.");
        }

        info!(
            "Pipeline assembled for topic: {topic} with {} consumer runner(s).",
            runners.len()
        );
        Ok(Pipeline {
            producer,
            reader,
            runners,
            log_leaderboard: config.leaderboard.log_after_publish,
        })
    }

    pub fn producer(&self) -> &EventProducer {
        &self.producer
    }

    pub fn leaderboard_reader(&self) -> Option<&LeaderboardReader> {
        self.reader.as_ref()
    }

    /// Publishes one bid per input line until `shutdown` is cancelled, then waits for
    /// every runner to finish its in-flight event. Reaching the end of the input does
    /// not stop the runners.
    pub async fn run<R>(
        mut self,
        input: R,
        shutdown: CancellationToken,
    ) -> Result<Vec<RunnerReport>, ServerError>
    where
        R: AsyncBufRead + Unpin,
    {
        let handles = self
            .runners
            .drain(..)
            .map(|runner| tokio::spawn(runner.run(shutdown.clone())))
            .collect::<Vec<_>>();

        let mut lines = input.lines();
        loop {
            let line = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) => self.publish_line(line.trim()).await,
                Ok(None) => {
                    info!("Input is closed, consuming until shutdown.");
                    shutdown.cancelled().await;
                    break;
                }
                Err(error) => {
                    error!("Cannot read input: {error}, consuming until shutdown.");
                    shutdown.cancelled().await;
                    break;
                }
            }
        }

        shutdown.cancel();
        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(error)) => error!("Consumer runner failed: {error}"),
                Err(error) => error!("Consumer runner task failed: {error}"),
            }
        }

        Ok(reports)
    }

    async fn publish_line(&self, line: &str) {
        if line.is_empty() {
            return;
        }

        match self.producer.publish_raw(line.as_bytes()).await {
            Ok(ack) => {
                info!("Bid published: {ack}");
                if self.log_leaderboard {
                    self.log_highest_bid().await;
                }
            }
            Err(AuctionError::SchemaViolation(violation)) => {
                warn!("Bid rejected: {violation}");
            }
            Err(error) => {
                error!("Bid was not published: {error}");
            }
        }
    }

    async fn log_highest_bid(&self) {
        let Some(reader) = &self.reader else {
            return;
        };

        match reader.highest_bid().await {
            Ok(Some(row)) => info!("Highest bid: {row}"),
            Ok(None) => info!("No bid has been recorded yet."),
            Err(error) => warn!("Cannot read the leaderboard: {error}"),
        }
    }
}

struct Subscriber<'a> {
    broker: &'a dyn StreamBroker,
    topic: &'a str,
    consumer: &'a ConsumerConfig,
    validator: &'a SchemaValidator,
}

impl Subscriber<'_> {
    async fn subscribe(&self, group: &str, sink: Arc<dyn Sink>) -> Result<ConsumerRunner, ServerError> {
        let runner = ConsumerRunner::subscribe(
            self.broker,
            self.topic,
            group,
            self.consumer.clone(),
            self.validator.clone(),
            sink,
        )
        .await?;
        Ok(runner)
    }
}

/// One-shot read used by the `leaderboard` command.
pub async fn highest_bid(config: &ServerConfig) -> Result<Option<LeaderboardRow>, ServerError> {
    let relational_config = &config.sinks.relational;
    prepare_sqlite_directory(&relational_config.url)?;
    let pool = relational::connect(&relational_config.url, 1).await?;
    let reader = LeaderboardReader::new(pool, &relational_config.table)?;
    let highest = reader.highest_bid().await?;
    Ok(highest)
}

fn create_broker(config: &BrokerConfig) -> Result<Arc<dyn StreamBroker>, ServerError> {
    match config.kind {
        BrokerKind::Memory => {
            let broker = MemoryBroker::new(config.partitions);
            broker.create_topic(&config.topic, config.partitions)?;
            info!(
                "Using embedded broker, topic: {} has {} partition(s).",
                config.topic, config.partitions
            );
            Ok(Arc::new(broker))
        }
        #[cfg(feature = "kafka")]
        BrokerKind::Kafka => {
            let broker = auction::broker::kafka::KafkaBroker::new(config.kafka.clone())?;
            info!(
                "Using Kafka broker at: {}",
                config.kafka.bootstrap_servers
            );
            Ok(Arc::new(broker))
        }
        #[cfg(not(feature = "kafka"))]
        BrokerKind::Kafka => Err(ServerError::InvalidConfiguration(
            "Kafka broker requires the server to be built with the kafka feature".to_string(),
        )),
    }
}

async fn create_registry(
    config: &SchemaRegistryConfig,
) -> Result<Box<dyn SchemaRegistry>, ServerError> {
    match config.kind {
        SchemaRegistryKind::Http => Ok(Box::new(HttpSchemaRegistry::new(config.http.clone())?)),
        SchemaRegistryKind::Bundled => {
            let schema = match &config.schema_path {
                Some(path) => tokio::fs::read_to_string(path).await?,
                None => AUCTION_VALUE_SCHEMA.to_string(),
            };
            let registry = StaticSchemaRegistry::default();
            registry.register(&config.subject, &schema)?;
            Ok(Box::new(registry))
        }
    }
}

async fn open_relational(config: &RelationalSinkConfig) -> Result<AnyPool, ServerError> {
    prepare_sqlite_directory(&config.url)?;
    let pool = relational::connect(&config.url, config.max_connections).await?;
    if config.ensure_table {
        relational::ensure_table(&pool, &config.table).await?;
    }
    Ok(pool)
}

async fn create_warehouse_sink(
    config: &WarehouseSinkConfig,
) -> Result<Option<WarehouseSink>, ServerError> {
    if !config.enabled {
        return Ok(None);
    }

    let inserter = Arc::new(ClickHouseInserter::new(config.clickhouse.clone())?);
    let Some(sink) = WarehouseSink::probe("warehouse", &config.table, inserter.clone()).await?
    else {
        return Ok(None);
    };

    if config.ensure_table {
        if let Err(error) = inserter.ensure_table(&config.table).await {
            warn!(
                "Warehouse table: {} could not be created, the warehouse sink is disabled: {error}",
                config.table
            );
            return Ok(None);
        }
    }
    Ok(Some(sink))
}

/// SQLite creates the database file on demand but not its directory.
fn prepare_sqlite_directory(url: &str) -> Result<(), ServerError> {
    let Some(path) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
    else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(path)
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_directory_should_be_created_for_file_databases() {
        let directory = tempfile::tempdir().unwrap();
        let database = directory.path().join("nested").join("auction.db");
        let url = format!("sqlite://{}?mode=rwc", database.display());

        prepare_sqlite_directory(&url).unwrap();

        assert!(directory.path().join("nested").is_dir());
    }

    #[test]
    fn memory_and_non_sqlite_urls_should_be_left_alone() {
        prepare_sqlite_directory("sqlite::memory:").unwrap();
        prepare_sqlite_directory("postgres://auction@localhost/auction").unwrap();
    }

    #[cfg(not(feature = "kafka"))]
    #[test]
    fn kafka_broker_should_need_the_feature() {
        let config = BrokerConfig {
            kind: BrokerKind::Kafka,
            ..BrokerConfig::default()
        };
        let result = create_broker(&config);
        assert!(matches!(result, Err(ServerError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn bundled_registry_should_serve_the_configured_subject() {
        let config = SchemaRegistryConfig {
            subject: "bids-value".to_string(),
            ..SchemaRegistryConfig::default()
        };
        let registry = create_registry(&config).await.unwrap();
        let validator = load_validator(registry.as_ref(), "bids-value", Some(1))
            .await
            .unwrap();
        assert_eq!(validator.descriptor().subject, "bids-value");
    }
}
