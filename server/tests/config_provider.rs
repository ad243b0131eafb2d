use auction::producer::Partitioning;
use auction_server::configs::config_provider::{ConfigProvider, FileConfigProvider};
use auction_server::configs::server::{BrokerKind, SchemaRegistryKind, ServerConfig};
use serial_test::serial;
use std::path::{Path, PathBuf};

fn get_root_path() -> PathBuf {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set!");
    PathBuf::from(manifest_dir)
}

fn repository_config_path() -> String {
    get_root_path()
        .join("../configs/server.toml")
        .to_str()
        .expect("Failed to convert config file to String")
        .to_owned()
}

#[tokio::test]
#[serial]
async fn validate_server_config_toml_from_repository() {
    let config_path = repository_config_path();
    assert!(
        Path::new(&config_path).is_file(),
        "Config file not found: {}",
        config_path
    );

    let config = ServerConfig::load(&FileConfigProvider::new(config_path.clone()))
        .await
        .unwrap_or_else(|error| panic!("Failed to load config from {config_path}: {error}"));

    assert_eq!(config.broker.kind, BrokerKind::Memory);
    assert_eq!(config.broker.topic, "auction");
    assert_eq!(config.schema_registry.kind, SchemaRegistryKind::Bundled);
    assert_eq!(config.schema_registry.version, None);
    assert_eq!(config.producer.partitioning, Partitioning::ByBidder);
    assert_eq!(config.sinks.relational.instances, 2);
    assert_eq!(config.consumer.retry.max_attempts, None);
    assert_eq!(config.consumer.poll_timeout.as_millis(), 1_000);
    assert!(!config.sinks.warehouse.enabled);
}

#[tokio::test]
#[serial]
async fn json_config_should_be_loaded() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("server.json");
    let mut config = ServerConfig::default();
    config.sinks.file.path = "bids.csv".to_string();
    config.consumer.batch_size = 10;
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    let provider = FileConfigProvider::new(path.to_str().unwrap().to_owned());
    let loaded = provider.load_config().await.unwrap();

    assert_eq!(loaded.sinks.file.path, "bids.csv");
    assert_eq!(loaded.consumer.batch_size, 10);
}

#[tokio::test]
#[serial]
async fn environment_should_override_the_file() {
    std::env::set_var("AUCTION_SINKS_RELATIONAL_TABLE", "bid_history");
    std::env::set_var("AUCTION_SINKS_RELATIONAL_MAX_CONNECTIONS", "8");
    std::env::set_var("AUCTION_CONSUMER_RETRY_MAX_DELAY", "30 s");
    std::env::set_var("AUCTION_SINKS_WAREHOUSE_ENABLED", "true");

    let result = FileConfigProvider::new(repository_config_path())
        .load_config()
        .await;

    std::env::remove_var("AUCTION_SINKS_RELATIONAL_TABLE");
    std::env::remove_var("AUCTION_SINKS_RELATIONAL_MAX_CONNECTIONS");
    std::env::remove_var("AUCTION_CONSUMER_RETRY_MAX_DELAY");
    std::env::remove_var("AUCTION_SINKS_WAREHOUSE_ENABLED");

    let config = result.unwrap();
    assert_eq!(config.sinks.relational.table, "bid_history");
    assert_eq!(config.sinks.relational.max_connections, 8);
    assert_eq!(config.consumer.retry.max_delay.as_millis(), 30_000);
    assert!(config.sinks.warehouse.enabled);
}

#[tokio::test]
#[serial]
async fn environment_should_set_keys_without_a_default_value() {
    std::env::set_var("AUCTION_SCHEMA_REGISTRY_HTTP_PASSWORD", "registry-secret");
    std::env::set_var("AUCTION_BROKER_KAFKA_SASL_USERNAME", "auction-client");
    std::env::set_var("AUCTION_CONSUMER_RETRY_MAX_ATTEMPTS", "7");

    let result = FileConfigProvider::new(repository_config_path())
        .load_config()
        .await;

    std::env::remove_var("AUCTION_SCHEMA_REGISTRY_HTTP_PASSWORD");
    std::env::remove_var("AUCTION_BROKER_KAFKA_SASL_USERNAME");
    std::env::remove_var("AUCTION_CONSUMER_RETRY_MAX_ATTEMPTS");

    let config = result.unwrap();
    assert_eq!(
        config.schema_registry.http.password.as_deref(),
        Some("registry-secret")
    );
    assert_eq!(
        config.broker.kafka.sasl_username.as_deref(),
        Some("auction-client")
    );
    assert_eq!(config.consumer.retry.max_attempts, Some(7));
    assert_eq!(config.schema_registry.http.username, None);
}

#[tokio::test]
#[serial]
async fn invalid_environment_value_should_fail_validation() {
    std::env::set_var("AUCTION_BROKER_PARTITIONS", "0");

    let result = ServerConfig::load(&FileConfigProvider::new(repository_config_path())).await;

    std::env::remove_var("AUCTION_BROKER_PARTITIONS");
    assert!(result.is_err());
}

#[tokio::test]
#[serial]
async fn unsupported_extension_should_be_rejected() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("server.yaml");
    std::fs::write(&path, "broker: {}").unwrap();

    let provider = FileConfigProvider::new(path.to_str().unwrap().to_owned());
    assert!(provider.load_config().await.is_err());
}

#[tokio::test]
#[serial]
async fn missing_file_should_be_rejected() {
    let provider = FileConfigProvider::new("/definitely/not/here/server.toml".to_string());
    assert!(provider.load_config().await.is_err());
}
