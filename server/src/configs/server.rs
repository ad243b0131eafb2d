use crate::configs::config_provider::ConfigProvider;
use crate::server_error::ServerError;
use auction::broker::KafkaConfig;
use auction::consumer::runner::ConsumerConfig;
use auction::producer::Partitioning;
use auction::schema::registry::HttpSchemaRegistryConfig;
use auction::sinks::warehouse::ClickHouseConfig;
use auction::validatable::Validatable;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub broker: BrokerConfig,
    pub schema_registry: SchemaRegistryConfig,
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
    pub sinks: SinksConfig,
    pub leaderboard: LeaderboardConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BrokerKind {
    Memory,
    Kafka,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    pub topic: String,
    pub partitions: u32,
    pub kafka: KafkaConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SchemaRegistryKind {
    Bundled,
    Http,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchemaRegistryConfig {
    pub kind: SchemaRegistryKind,
    pub subject: String,
    /// Pinned version, the latest one is used when missing.
    pub version: Option<u32>,
    /// JSON Schema registered in place of the built-in one when `kind` is `bundled`.
    pub schema_path: Option<String>,
    pub http: HttpSchemaRegistryConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProducerConfig {
    pub partitioning: Partitioning,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SinksConfig {
    pub relational: RelationalSinkConfig,
    pub file: FileSinkConfig,
    pub warehouse: WarehouseSinkConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelationalSinkConfig {
    pub enabled: bool,
    pub group: String,
    /// Sink instances sharing the group, each one owning a share of the partitions.
    pub instances: u32,
    pub url: String,
    pub max_connections: u32,
    pub table: String,
    pub ensure_table: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FileSinkConfig {
    pub enabled: bool,
    pub group: String,
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WarehouseSinkConfig {
    pub enabled: bool,
    pub group: String,
    pub table: String,
    pub ensure_table: bool,
    pub clickhouse: ClickHouseConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LeaderboardConfig {
    /// Logs the highest bid after every acknowledged publish.
    pub log_after_publish: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub path: String,
}

impl ServerConfig {
    pub async fn load(config_provider: &dyn ConfigProvider) -> Result<ServerConfig, ServerError> {
        let server_config = config_provider.load_config().await?;
        server_config.validate()?;
        Ok(server_config)
    }
}
