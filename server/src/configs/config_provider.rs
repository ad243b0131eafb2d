use crate::configs::server::ServerConfig;
use crate::server_error::ServerError;
use async_trait::async_trait;
use figment::{
    providers::{Format, Json, Toml},
    value::{Dict, Map as FigmentMap, Tag, Value as FigmentValue},
    Error, Figment, Metadata, Profile, Provider,
};
use std::{env, path::Path};
use toml::{map::Map, Value as TomlValue};
use tracing::info;

pub const CONFIG_PATH_ENV: &str = "AUCTION_CONFIG_PATH";
pub const ENV_PREFIX: &str = "AUCTION_";
const DEFAULT_CONFIG_PROVIDER: &str = "file";
const DEFAULT_CONFIG_PATH: &str = "configs/server.toml";

/// Optional keys absent from the serialized defaults; they still accept overrides.
const OPTIONAL_KEYS: &[&[&str]] = &[
    &["broker", "kafka", "sasl_username"],
    &["broker", "kafka", "sasl_password"],
    &["schema_registry", "version"],
    &["schema_registry", "schema_path"],
    &["schema_registry", "http", "username"],
    &["schema_registry", "http", "password"],
    &["consumer", "retry", "max_attempts"],
];

#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn load_config(&self) -> Result<ServerConfig, ServerError>;
}

#[derive(Debug)]
pub struct FileConfigProvider {
    path: String,
}

impl FileConfigProvider {
    pub fn new(path: String) -> Self {
        Self { path }
    }
}

/// Overlays `AUCTION_`-prefixed environment variables on top of the loaded file.
///
/// Variable names are matched against the keys of the default configuration, so
/// `AUCTION_SINKS_RELATIONAL_MAX_CONNECTIONS` resolves to `sinks.relational.max_connections`.
/// Variables that match no known key are ignored.
pub struct CustomEnvProvider {
    prefix: String,
}

impl CustomEnvProvider {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    fn table_to_dict(table: Map<String, TomlValue>) -> Dict {
        let mut dict = Dict::new();
        for (key, value) in table {
            dict.insert(key, Self::toml_to_figment_value(value));
        }
        dict
    }

    fn toml_to_figment_value(toml_value: TomlValue) -> FigmentValue {
        match toml_value {
            TomlValue::String(value) => FigmentValue::from(value),
            TomlValue::Integer(value) => FigmentValue::from(value),
            TomlValue::Float(value) => FigmentValue::from(value),
            TomlValue::Boolean(value) => FigmentValue::from(value),
            TomlValue::Datetime(value) => FigmentValue::from(value.to_string()),
            TomlValue::Array(values) => FigmentValue::from(
                values
                    .into_iter()
                    .map(Self::toml_to_figment_value)
                    .collect::<Vec<_>>(),
            ),
            TomlValue::Table(table) => FigmentValue::from(Self::table_to_dict(table)),
        }
    }

    /// Walks `keys` down the known configuration tree, joining segments with `_`
    /// whenever the joined name is a known key (field names contain underscores too).
    fn insert_overridden_value(source: &Dict, target: &mut Dict, keys: &[String], value: FigmentValue) {
        for split in (1..=keys.len()).rev() {
            let key = keys[..split].join("_");
            let Some(known) = source.get(&key) else {
                continue;
            };

            if split == keys.len() {
                if !matches!(known, FigmentValue::Dict(..)) {
                    target.insert(key, value);
                }
                return;
            }

            if let FigmentValue::Dict(_, inner_source) = known {
                let mut inner_target = match target.remove(&key) {
                    Some(FigmentValue::Dict(_, inner_target)) => inner_target,
                    _ => Dict::new(),
                };
                Self::insert_overridden_value(inner_source, &mut inner_target, &keys[split..], value);
                if !inner_target.is_empty() {
                    target.insert(key, FigmentValue::Dict(Tag::Default, inner_target));
                }
                return;
            }
        }
    }

    /// Known keys: the serialized defaults plus every optional key.
    fn source_dict() -> Result<Dict, Error> {
        let default_config = toml::to_string(&ServerConfig::default())
            .map_err(|error| Error::from(format!("Cannot serialize default config: {error}")))?;
        let toml_value: TomlValue = toml::from_str(&default_config)
            .map_err(|error| Error::from(format!("Cannot parse default config: {error}")))?;
        let mut source_dict = match toml_value {
            TomlValue::Table(table) => Self::table_to_dict(table),
            _ => Dict::new(),
        };
        for path in OPTIONAL_KEYS {
            Self::insert_known_key(&mut source_dict, path);
        }
        Ok(source_dict)
    }

    fn insert_known_key(dict: &mut Dict, path: &[&str]) {
        let Some((first, rest)) = path.split_first() else {
            return;
        };
        if rest.is_empty() {
            dict.entry(first.to_string())
                .or_insert_with(|| FigmentValue::from(String::new()));
            return;
        }
        let entry = dict
            .entry(first.to_string())
            .or_insert_with(|| FigmentValue::Dict(Tag::Default, Dict::new()));
        if let FigmentValue::Dict(_, inner) = entry {
            Self::insert_known_key(inner, rest);
        }
    }

    fn try_parse_value(value: &str) -> FigmentValue {
        if value == "true" {
            return FigmentValue::from(true);
        }
        if value == "false" {
            return FigmentValue::from(false);
        }
        if let Ok(int_val) = value.parse::<i64>() {
            return FigmentValue::from(int_val);
        }
        if let Ok(float_val) = value.parse::<f64>() {
            return FigmentValue::from(float_val);
        }
        FigmentValue::from(value)
    }
}

impl Provider for CustomEnvProvider {
    fn metadata(&self) -> Metadata {
        Metadata::named("auction-server config")
    }

    fn data(&self) -> Result<FigmentMap<Profile, Dict>, Error> {
        let source_dict = Self::source_dict()?;
        let mut new_dict = Dict::new();
        for (key, value) in env::vars() {
            let env_key = key.to_uppercase();
            if env_key == CONFIG_PATH_ENV || !env_key.starts_with(self.prefix.as_str()) {
                continue;
            }
            let keys: Vec<String> = env_key[self.prefix.len()..]
                .split('_')
                .map(|k| k.to_lowercase())
                .collect();
            info!("{env_key} value overridden from environment variable");
            Self::insert_overridden_value(
                &source_dict,
                &mut new_dict,
                &keys,
                Self::try_parse_value(&value),
            );
        }
        let mut data = FigmentMap::new();
        data.insert(Profile::default(), new_dict);

        Ok(data)
    }
}

/// Picks the provider; an explicit path wins over `AUCTION_CONFIG_PATH`.
pub fn resolve(
    config_provider_type: &str,
    path: Option<String>,
) -> Result<Box<dyn ConfigProvider>, ServerError> {
    match config_provider_type {
        DEFAULT_CONFIG_PROVIDER => {
            let path = path
                .or_else(|| env::var(CONFIG_PATH_ENV).ok())
                .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
            Ok(Box::new(FileConfigProvider::new(path)))
        }
        _ => Err(ServerError::InvalidConfigurationProvider(
            config_provider_type.to_string(),
        )),
    }
}

/// Same lookup figment performs: relative paths are searched upwards from the working directory.
fn file_exists<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    if path.is_absolute() {
        return path.is_file();
    }

    let Ok(cwd) = env::current_dir() else {
        return false;
    };
    cwd.ancestors().any(|directory| directory.join(path).is_file())
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load_config(&self) -> Result<ServerConfig, ServerError> {
        info!("Loading config from path: '{}'...", self.path);

        if !file_exists(&self.path) {
            return Err(ServerError::CannotLoadConfiguration(format!(
                "Cannot find configuration file at path: '{}'.",
                self.path,
            )));
        }

        let config_builder = Figment::new();
        let extension = self.path.rsplit('.').next().unwrap_or("");
        let config_builder = match extension {
            "json" => config_builder.merge(Json::file(&self.path)),
            "toml" => config_builder.merge(Toml::file(&self.path)),
            e => {
                return Err(ServerError::CannotLoadConfiguration(format!("Cannot load configuration: invalid file extension: {e}, only .json and .toml are supported.")));
            }
        };

        let config_result: Result<ServerConfig, figment::Error> = config_builder
            .merge(CustomEnvProvider::new(ENV_PREFIX))
            .extract();

        match config_result {
            Ok(config) => {
                info!("Config loaded from path: '{}'", self.path);
                info!("Using Config: {}", config);
                Ok(config)
            }
            Err(figment_error) => Err(ServerError::CannotLoadConfiguration(format!(
                "Failed to load configuration: {}",
                figment_error
            ))),
        }
    }
}
