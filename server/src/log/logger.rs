use crate::configs::server::LoggingConfig;
use crate::server_error::ServerError;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{event, trace, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{
    filter::LevelFilter, fmt, fmt::format::Format, reload, reload::Handle, EnvFilter, Layer,
    Registry,
};

const LOG_FILE_PREFIX: &str = "auction-server.log";

// Writer that does nothing
struct NullWriter;
impl Write for NullWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

type ReloadHandle = Handle<Box<dyn Layer<Registry> + Send + Sync>, Registry>;

/// Two-phase logging: stdout from the first line of `main`, then the configured
/// level and the optional rolling file once the configuration is loaded.
#[derive(Default)]
pub struct Logging {
    file_guard: Option<WorkerGuard>,
    file_reload_handle: Option<ReloadHandle>,

    filtering_stdout_reload_handle: Option<ReloadHandle>,
    filtering_file_reload_handle: Option<ReloadHandle>,
}

impl Logging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn early_init(&mut self) -> Result<(), ServerError> {
        // Stdout is live right away, the file layer drains into nothing until late_init.
        let filtering_level = Self::get_filtering_level(None);
        let (filtering_stdout_layer, filtering_stdout_reload_handle) =
            reload::Layer::new(filtering_level.boxed());
        self.filtering_stdout_reload_handle = Some(filtering_stdout_reload_handle);

        let (filtering_file_layer, filtering_file_reload_handle) =
            reload::Layer::new(filtering_level.boxed());
        self.filtering_file_reload_handle = Some(filtering_file_reload_handle);

        let stdout_layer = fmt::Layer::default()
            .event_format(Self::get_log_format())
            .with_writer(io::stdout)
            .with_ansi(true);

        let file_layer = fmt::Layer::default()
            .event_format(Self::get_log_format())
            .with_writer(|| NullWriter)
            .boxed();
        let (file_layer, file_layer_reload_handle) = reload::Layer::new(file_layer);
        self.file_reload_handle = Some(file_layer_reload_handle);

        let layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![
            stdout_layer.and_then(filtering_stdout_layer).boxed(),
            file_layer.and_then(filtering_file_layer).boxed(),
        ];

        Registry::default()
            .with(layers)
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace")))
            .try_init()
            .map_err(|error| ServerError::LoggingInitFailure(error.to_string()))
    }

    pub fn late_init(&mut self, config: &LoggingConfig) -> Result<(), ServerError> {
        trace!("Logging config: {}", config);

        let filtering_level = Self::get_filtering_level(Some(config));
        self.filtering_stdout_reload_handle
            .as_ref()
            .ok_or(ServerError::FilterReloadFailure)?
            .modify(|layer| *layer = filtering_level.boxed())
            .map_err(|_| ServerError::FilterReloadFailure)?;

        if !config.file_enabled {
            event_at(
                filtering_level,
                &format!("Logging initialized, log level is: {filtering_level}."),
            );
            return Ok(());
        }

        self.filtering_file_reload_handle
            .as_ref()
            .ok_or(ServerError::FilterReloadFailure)?
            .modify(|layer| *layer = filtering_level.boxed())
            .map_err(|_| ServerError::FilterReloadFailure)?;

        let logs_path = PathBuf::from(&config.path);
        std::fs::create_dir_all(&logs_path)?;
        let file_appender = tracing_appender::rolling::daily(&logs_path, LOG_FILE_PREFIX);
        let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
        let file_layer = fmt::layer()
            .event_format(Self::get_log_format())
            .with_target(true)
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .boxed();

        self.file_guard = Some(file_guard);
        self.file_reload_handle
            .as_ref()
            .ok_or(ServerError::FileReloadFailure)?
            .modify(|layer| *layer = file_layer)
            .map_err(|_| ServerError::FileReloadFailure)?;

        event_at(
            filtering_level,
            &format!(
                "Logging initialized, logs will be stored at: {logs_path:?}. Logs will be rotated daily. Log level is: {filtering_level}."
            ),
        );
        Ok(())
    }

    // RUST_LOG always takes precedence over config
    fn get_filtering_level(config: Option<&LoggingConfig>) -> LevelFilter {
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            // Directives such as `auction=debug` are left to the EnvFilter.
            return LevelFilter::from_str(&rust_log).unwrap_or(LevelFilter::TRACE);
        }

        match config {
            Some(config) => LevelFilter::from_str(&config.level).unwrap_or_else(|_| {
                println!(
                    "Invalid log level in config: {}, falling back to info",
                    config.level
                );
                LevelFilter::INFO
            }),
            None => LevelFilter::INFO,
        }
    }

    fn get_log_format() -> Format {
        Format::default().with_thread_ids(true)
    }
}

fn event_at(level: LevelFilter, message: &str) {
    match level {
        LevelFilter::OFF => (),
        LevelFilter::ERROR => event!(Level::ERROR, "{}", message),
        LevelFilter::WARN => event!(Level::WARN, "{}", message),
        LevelFilter::INFO => event!(Level::INFO, "{}", message),
        LevelFilter::DEBUG => event!(Level::DEBUG, "{}", message),
        LevelFilter::TRACE => event!(Level::TRACE, "{}", message),
    }
}
