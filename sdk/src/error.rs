use thiserror::Error;

/// Reasons a payload does not conform to the registered bid schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("Payload is not valid JSON: {0}")]
    MalformedPayload(String),
    #[error("Payload is not a JSON object")]
    NotAnObject,
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Unexpected field: {0}")]
    UnexpectedField(String),
    #[error("Invalid type for field: {field}, expected: {expected}")]
    InvalidType { field: String, expected: String },
    #[error("Field: {0} cannot be empty")]
    EmptyField(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Broker-side publication failure, classified for the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("Retryable publish failure: {0}")]
    Retryable(String),
    #[error("Fatal publish failure: {0}")]
    Fatal(String),
}

impl PublishError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PublishError::Retryable(_))
    }
}

/// Outcome of a failed sink apply, classified for the consumer runner.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("Retryable sink failure: {0}")]
    Retryable(String),
    #[error("Fatal sink failure: {0}")]
    Fatal(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Retryable(_))
    }
}

#[derive(Debug, Error)]
pub enum AuctionError {
    #[error("Schema violation: {0}")]
    SchemaViolation(#[from] SchemaViolation),
    #[error("Publish error: {0}")]
    PublishFailed(#[from] PublishError),
    #[error("Sink error: {0}")]
    SinkFailed(#[from] SinkError),
    #[error("Invalid schema for subject: {subject}: {reason}")]
    InvalidSchema { subject: String, reason: String },
    #[error("Schema version mismatch for subject: {subject}, expected: {expected}, actual: {actual}")]
    SchemaVersionMismatch {
        subject: String,
        expected: u32,
        actual: u32,
    },
    #[error("Unknown schema ID: {0}")]
    UnknownSchemaId(u32),
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),
    #[error("Cannot fetch schema for subject: {subject}: {reason}")]
    CannotFetchSchema { subject: String, reason: String },
    #[error("Topic: {0} was not found")]
    TopicNotFound(String),
    #[error("Partition: {0} was not found in topic: {1}")]
    PartitionNotFound(u32, String),
    #[error("Invalid offset: {offset} for partition: {partition_id}, current: {current}")]
    InvalidOffset {
        partition_id: u32,
        offset: u64,
        current: u64,
    },
    #[error("Consumer group member: {0} was not found in group: {1}")]
    ConsumerGroupMemberNotFound(u32, String),
    #[error("Subscription is closed")]
    SubscriptionClosed,
    #[error("Broker error: {0}")]
    Broker(String),
    #[error("Database error")]
    Database(#[from] sqlx::Error),
    #[error("HTTP request error")]
    Request(#[from] reqwest::Error),
    #[error("IO error")]
    Io(#[from] std::io::Error),
    #[error("JSON error")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl AuctionError {
    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuctionError::PublishFailed(error) => error.is_retryable(),
            AuctionError::SinkFailed(error) => error.is_retryable(),
            AuctionError::Request(error) => error.is_timeout() || error.is_connect(),
            AuctionError::Io(_) => true,
            _ => false,
        }
    }

    pub fn as_string(&self) -> &'static str {
        match self {
            AuctionError::SchemaViolation(_) => "schema_violation",
            AuctionError::PublishFailed(_) => "publish_failed",
            AuctionError::SinkFailed(_) => "sink_failed",
            AuctionError::InvalidSchema { .. } => "invalid_schema",
            AuctionError::SchemaVersionMismatch { .. } => "schema_version_mismatch",
            AuctionError::UnknownSchemaId(_) => "unknown_schema_id",
            AuctionError::InvalidWireFormat(_) => "invalid_wire_format",
            AuctionError::CannotFetchSchema { .. } => "cannot_fetch_schema",
            AuctionError::TopicNotFound(_) => "topic_not_found",
            AuctionError::PartitionNotFound(_, _) => "partition_not_found",
            AuctionError::InvalidOffset { .. } => "invalid_offset",
            AuctionError::ConsumerGroupMemberNotFound(_, _) => "consumer_group_member_not_found",
            AuctionError::SubscriptionClosed => "subscription_closed",
            AuctionError::Broker(_) => "broker",
            AuctionError::Database(_) => "database",
            AuctionError::Request(_) => "request",
            AuctionError::Io(_) => "io",
            AuctionError::Json(_) => "json",
            AuctionError::InvalidConfiguration(_) => "invalid_configuration",
        }
    }
}
