use crate::configs::server::{
    BrokerConfig, BrokerKind, FileSinkConfig, LeaderboardConfig, LoggingConfig, ProducerConfig,
    RelationalSinkConfig, SchemaRegistryConfig, SchemaRegistryKind, ServerConfig, SinksConfig,
    WarehouseSinkConfig,
};
use auction::broker::memory::DEFAULT_PARTITIONS_COUNT;
use auction::broker::KafkaConfig;
use auction::consumer::runner::ConsumerConfig;
use auction::producer::{Partitioning, DEFAULT_TOPIC};
use auction::schema::descriptor::AUCTION_VALUE_SUBJECT;
use auction::schema::registry::HttpSchemaRegistryConfig;
use auction::sinks::relational::DEFAULT_TABLE;
use auction::sinks::warehouse::ClickHouseConfig;

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            broker: BrokerConfig::default(),
            schema_registry: SchemaRegistryConfig::default(),
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
            sinks: SinksConfig::default(),
            leaderboard: LeaderboardConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> BrokerConfig {
        BrokerConfig {
            kind: BrokerKind::Memory,
            topic: DEFAULT_TOPIC.to_string(),
            partitions: DEFAULT_PARTITIONS_COUNT,
            kafka: KafkaConfig::default(),
        }
    }
}

impl Default for SchemaRegistryConfig {
    fn default() -> SchemaRegistryConfig {
        SchemaRegistryConfig {
            kind: SchemaRegistryKind::Bundled,
            subject: AUCTION_VALUE_SUBJECT.to_string(),
            version: None,
            schema_path: None,
            http: HttpSchemaRegistryConfig::default(),
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> ProducerConfig {
        ProducerConfig {
            partitioning: Partitioning::ByBidder,
        }
    }
}

impl Default for SinksConfig {
    fn default() -> SinksConfig {
        SinksConfig {
            relational: RelationalSinkConfig::default(),
            file: FileSinkConfig::default(),
            warehouse: WarehouseSinkConfig::default(),
        }
    }
}

impl Default for RelationalSinkConfig {
    fn default() -> RelationalSinkConfig {
        RelationalSinkConfig {
            enabled: true,
            group: "relational".to_string(),
            instances: 2,
            url: "sqlite://local_data/auction.db?mode=rwc".to_string(),
            max_connections: 4,
            table: DEFAULT_TABLE.to_string(),
            ensure_table: true,
        }
    }
}

impl Default for FileSinkConfig {
    fn default() -> FileSinkConfig {
        FileSinkConfig {
            enabled: true,
            group: "file".to_string(),
            path: "local_data/bids.csv".to_string(),
        }
    }
}

impl Default for WarehouseSinkConfig {
    fn default() -> WarehouseSinkConfig {
        WarehouseSinkConfig {
            enabled: false,
            group: "warehouse".to_string(),
            table: "bids".to_string(),
            ensure_table: true,
            clickhouse: ClickHouseConfig::default(),
        }
    }
}

impl Default for LeaderboardConfig {
    fn default() -> LeaderboardConfig {
        LeaderboardConfig {
            log_after_publish: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> LoggingConfig {
        LoggingConfig {
            level: "info".to_string(),
            file_enabled: false,
            path: "local_data/logs".to_string(),
        }
    }
}
