use crate::error::AuctionError;
use crate::schema::descriptor::{SchemaDescriptor, AUCTION_VALUE_SCHEMA, AUCTION_VALUE_SUBJECT};
use crate::schema::validator::SchemaValidator;
use crate::utils::duration::AuctionDuration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::fmt::{Display, Formatter};
use std::sync::RwLock;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    Latest,
    Version(u32),
}

impl From<Option<u32>> for SchemaVersion {
    fn from(value: Option<u32>) -> Self {
        match value {
            Some(version) => SchemaVersion::Version(version),
            None => SchemaVersion::Latest,
        }
    }
}

impl Display for SchemaVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaVersion::Latest => write!(f, "latest"),
            SchemaVersion::Version(version) => write!(f, "{version}"),
        }
    }
}

/// Read side of the external schema registry.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn get_schema(
        &self,
        subject: &str,
        version: SchemaVersion,
    ) -> Result<SchemaDescriptor, AuctionError>;

    async fn get_schema_by_id(&self, id: u32) -> Result<SchemaDescriptor, AuctionError>;
}

/// Fetches the subject once and builds the validator used for the whole process lifetime.
///
/// A pinned version that the registry does not serve is a hard failure.
pub async fn load_validator(
    registry: &dyn SchemaRegistry,
    subject: &str,
    pinned_version: Option<u32>,
) -> Result<SchemaValidator, AuctionError> {
    let requested = SchemaVersion::from(pinned_version);
    info!("Fetching schema for subject: {subject}, version: {requested}...");
    let descriptor = registry.get_schema(subject, requested).await?;
    if let Some(expected) = pinned_version {
        if descriptor.version != expected {
            error!(
                "Schema registry returned version: {} for subject: {subject}, expected: {expected}.",
                descriptor.version
            );
            return Err(AuctionError::SchemaVersionMismatch {
                subject: subject.to_string(),
                expected,
                actual: descriptor.version,
            });
        }
    }

    info!("Using schema: {descriptor}");
    SchemaValidator::new(descriptor)
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSchemaRegistryConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde_as(as = "DisplayFromStr")]
    pub timeout: AuctionDuration,
}

impl Default for HttpSchemaRegistryConfig {
    fn default() -> Self {
        HttpSchemaRegistryConfig {
            url: "http://localhost:8081".to_string(),
            username: None,
            password: None,
            timeout: AuctionDuration::from_millis(5_000),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisteredSchemaResponse {
    subject: String,
    version: u32,
    id: u32,
    schema: String,
}

#[derive(Debug, Deserialize)]
struct SchemaByIdResponse {
    schema: String,
}

#[derive(Debug, Deserialize)]
struct SubjectVersionResponse {
    subject: String,
    version: u32,
}

/// Client for a registry speaking the Confluent-compatible REST API.
#[derive(Debug)]
pub struct HttpSchemaRegistry {
    client: reqwest::Client,
    config: HttpSchemaRegistryConfig,
}

impl HttpSchemaRegistry {
    pub fn new(config: HttpSchemaRegistryConfig) -> Result<Self, AuctionError> {
        let mut builder = reqwest::Client::builder();
        if !config.timeout.is_zero() {
            builder = builder.timeout(config.timeout.get_duration());
        }
        let client = builder.build()?;
        Ok(HttpSchemaRegistry { client, config })
    }

    fn version_url(&self, subject: &str, version: SchemaVersion) -> String {
        format!(
            "{}/subjects/{subject}/versions/{version}",
            self.config.url.trim_end_matches('/')
        )
    }

    fn id_url(&self, id: u32) -> String {
        format!("{}/schemas/ids/{id}", self.config.url.trim_end_matches('/'))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        subject: &str,
    ) -> Result<T, AuctionError> {
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.schemaregistry.v1+json");
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuctionError::CannotFetchSchema {
                subject: subject.to_string(),
                reason: format!("registry responded with status: {status}, body: {body}"),
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn get_schema(
        &self,
        subject: &str,
        version: SchemaVersion,
    ) -> Result<SchemaDescriptor, AuctionError> {
        let url = self.version_url(subject, version);
        let registered = self
            .get_json::<RegisteredSchemaResponse>(&url, subject)
            .await?;
        if registered.subject != subject {
            return Err(AuctionError::CannotFetchSchema {
                subject: subject.to_string(),
                reason: format!("registry answered for subject: {}", registered.subject),
            });
        }

        SchemaDescriptor::parse(
            &registered.subject,
            registered.version,
            registered.id,
            &registered.schema,
        )
    }

    async fn get_schema_by_id(&self, id: u32) -> Result<SchemaDescriptor, AuctionError> {
        let label = format!("id:{id}");
        let url = self.id_url(id);
        let schema = self.get_json::<SchemaByIdResponse>(&url, &label).await?;
        let versions = self
            .get_json::<Vec<SubjectVersionResponse>>(&format!("{url}/versions"), &label)
            .await?;
        let Some(registered) = versions.into_iter().next() else {
            return Err(AuctionError::UnknownSchemaId(id));
        };

        SchemaDescriptor::parse(&registered.subject, registered.version, id, &schema.schema)
    }
}

/// Registry serving schemas registered in-process.
#[derive(Debug, Default)]
pub struct StaticSchemaRegistry {
    schemas: RwLock<Vec<SchemaDescriptor>>,
}

impl StaticSchemaRegistry {
    /// Registry holding the bundled `auction-value` schema as version 1, ID 1.
    pub fn bundled() -> Result<Self, AuctionError> {
        let registry = StaticSchemaRegistry::default();
        registry.register(AUCTION_VALUE_SUBJECT, AUCTION_VALUE_SCHEMA)?;
        Ok(registry)
    }

    /// Registers a new version of the subject, returning the assigned descriptor.
    pub fn register(&self, subject: &str, schema: &str) -> Result<SchemaDescriptor, AuctionError> {
        let mut schemas = self
            .schemas
            .write()
            .map_err(|_| AuctionError::Broker("schema registry lock poisoned".to_string()))?;
        let id = schemas.len() as u32 + 1;
        let version = schemas
            .iter()
            .filter(|descriptor| descriptor.subject == subject)
            .count() as u32
            + 1;
        let descriptor = SchemaDescriptor::parse(subject, version, id, schema)?;
        schemas.push(descriptor.clone());
        Ok(descriptor)
    }
}

#[async_trait]
impl SchemaRegistry for StaticSchemaRegistry {
    async fn get_schema(
        &self,
        subject: &str,
        version: SchemaVersion,
    ) -> Result<SchemaDescriptor, AuctionError> {
        let schemas = self
            .schemas
            .read()
            .map_err(|_| AuctionError::Broker("schema registry lock poisoned".to_string()))?;
        let found = schemas
            .iter()
            .filter(|descriptor| descriptor.subject == subject)
            .filter(|descriptor| match version {
                SchemaVersion::Latest => true,
                SchemaVersion::Version(version) => descriptor.version == version,
            })
            .max_by_key(|descriptor| descriptor.version);
        found.cloned().ok_or_else(|| AuctionError::CannotFetchSchema {
            subject: subject.to_string(),
            reason: format!("version: {version} is not registered"),
        })
    }

    async fn get_schema_by_id(&self, id: u32) -> Result<SchemaDescriptor, AuctionError> {
        let schemas = self
            .schemas
            .read()
            .map_err(|_| AuctionError::Broker("schema registry lock poisoned".to_string()))?;
        schemas
            .iter()
            .find(|descriptor| descriptor.id == id)
            .cloned()
            .ok_or(AuctionError::UnknownSchemaId(id))
    }
}
