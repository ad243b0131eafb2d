use crate::configs::server::{
    BrokerConfig, FileSinkConfig, LoggingConfig, RelationalSinkConfig, SchemaRegistryConfig,
    SchemaRegistryKind, ServerConfig, SinksConfig, WarehouseSinkConfig,
};
use crate::server_error::ServerError;
use auction::sinks::is_valid_identifier;
use auction::validatable::Validatable;
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

impl Validatable<ServerError> for ServerConfig {
    fn validate(&self) -> Result<(), ServerError> {
        self.broker.validate()?;
        self.schema_registry.validate()?;
        if self.consumer.batch_size == 0 {
            error!("Consumer configuration -> batch size cannot be zero.");
            return Err(ServerError::InvalidConfiguration(
                "consumer batch size cannot be zero".to_string(),
            ));
        }
        self.consumer.retry.validate()?;
        self.sinks.validate()?;
        self.logging.validate()?;

        Ok(())
    }
}

impl Validatable<ServerError> for BrokerConfig {
    fn validate(&self) -> Result<(), ServerError> {
        if self.topic.is_empty() {
            error!("Broker configuration -> topic cannot be empty.");
            return Err(ServerError::InvalidConfiguration(
                "broker topic cannot be empty".to_string(),
            ));
        }

        if self.partitions == 0 {
            error!("Broker configuration -> partitions count cannot be zero.");
            return Err(ServerError::InvalidConfiguration(
                "broker partitions count cannot be zero".to_string(),
            ));
        }

        Ok(())
    }
}

impl Validatable<ServerError> for SchemaRegistryConfig {
    fn validate(&self) -> Result<(), ServerError> {
        if self.subject.is_empty() {
            return Err(ServerError::InvalidConfiguration(
                "schema registry subject cannot be empty".to_string(),
            ));
        }

        if self.version == Some(0) {
            return Err(ServerError::InvalidConfiguration(
                "schema versions start at 1".to_string(),
            ));
        }

        if self.kind == SchemaRegistryKind::Http && self.http.url.is_empty() {
            error!("Schema registry configuration -> URL is required for the HTTP registry.");
            return Err(ServerError::InvalidConfiguration(
                "schema registry URL cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Validatable<ServerError> for SinksConfig {
    fn validate(&self) -> Result<(), ServerError> {
        self.relational.validate()?;
        self.file.validate()?;
        self.warehouse.validate()?;

        let mut groups = Vec::new();
        if self.relational.enabled {
            groups.push(self.relational.group.as_str());
        }
        if self.file.enabled {
            groups.push(self.file.group.as_str());
        }
        if self.warehouse.enabled {
            groups.push(self.warehouse.group.as_str());
        }
        for (index, group) in groups.iter().enumerate() {
            if group.is_empty() {
                return Err(ServerError::InvalidConfiguration(
                    "sink group cannot be empty".to_string(),
                ));
            }
            if groups[..index].contains(group) {
                error!("Sinks configuration -> group: {group} is used by more than one sink.");
                return Err(ServerError::InvalidConfiguration(format!(
                    "sink group: {group} is shared by different sinks"
                )));
            }
        }

        Ok(())
    }
}

impl Validatable<ServerError> for RelationalSinkConfig {
    fn validate(&self) -> Result<(), ServerError> {
        if !is_valid_identifier(&self.table) {
            return Err(ServerError::InvalidConfiguration(format!(
                "invalid relational table name: {}",
                self.table
            )));
        }

        if !self.enabled {
            return Ok(());
        }

        if self.url.is_empty() {
            return Err(ServerError::InvalidConfiguration(
                "relational sink URL cannot be empty".to_string(),
            ));
        }

        if self.instances == 0 || self.max_connections == 0 {
            error!("Relational sink configuration -> instances and max connections must be positive.");
            return Err(ServerError::InvalidConfiguration(
                "relational sink instances and max connections must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

impl Validatable<ServerError> for FileSinkConfig {
    fn validate(&self) -> Result<(), ServerError> {
        if self.enabled && self.path.is_empty() {
            return Err(ServerError::InvalidConfiguration(
                "file sink path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Validatable<ServerError> for WarehouseSinkConfig {
    fn validate(&self) -> Result<(), ServerError> {
        if !self.enabled {
            return Ok(());
        }

        if self.clickhouse.url.is_empty() {
            error!("Warehouse sink configuration -> URL is required when the sink is enabled.");
            return Err(ServerError::InvalidConfiguration(
                "warehouse URL cannot be empty".to_string(),
            ));
        }

        if !is_valid_identifier(&self.table) {
            return Err(ServerError::InvalidConfiguration(format!(
                "invalid warehouse table name: {}",
                self.table
            )));
        }

        Ok(())
    }
}

impl Validatable<ServerError> for LoggingConfig {
    fn validate(&self) -> Result<(), ServerError> {
        if LevelFilter::from_str(&self.level).is_err() {
            return Err(ServerError::InvalidConfiguration(format!(
                "invalid log level: {}",
                self.level
            )));
        }

        if self.file_enabled && self.path.is_empty() {
            return Err(ServerError::InvalidConfiguration(
                "log path cannot be empty when file logging is enabled".to_string(),
            ));
        }

        Ok(())
    }
}
