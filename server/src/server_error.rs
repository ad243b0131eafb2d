use auction::error::AuctionError;
use thiserror::Error;
use tokio::io;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error")]
    IoError(#[from] io::Error),
    #[error("Invalid configuration provider: {0}")]
    InvalidConfigurationProvider(String),
    #[error("Cannot load configuration: {0}")]
    CannotLoadConfiguration(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Pipeline error: {0}")]
    PipelineError(#[from] AuctionError),
    #[error("Consumer runner task failed")]
    RunnerTaskFailure(#[from] JoinError),
    #[error("Logging initialization failure: {0}")]
    LoggingInitFailure(String),
    #[error("Logging filter reload failure")]
    FilterReloadFailure,
    #[error("Logging file reload failure")]
    FileReloadFailure,
}
