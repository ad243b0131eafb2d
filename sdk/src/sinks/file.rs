use crate::error::{AuctionError, SinkError};
use crate::models::bid::BidEvent;
use crate::sinks::{ensure_non_negative_price, Sink};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Appends one `name,price,bid_ts` line per bid to a single file.
///
/// Assumes it is the only writer. A line is flushed and synced to disk before `apply`
/// returns, so a successful apply survives a crash. A failed append is rolled back to the
/// last complete line before the retry, so a torn line never precedes the retried one.
#[derive(Debug)]
pub struct FileSink {
    name: String,
    path: PathBuf,
    state: Mutex<AppendState>,
}

#[derive(Debug)]
struct AppendState {
    file: Option<File>,
    /// File length after the last fully synced record.
    committed_len: u64,
}

impl FileSink {
    pub async fn open(name: &str, path: impl AsRef<Path>) -> Result<Self, AuctionError> {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path).await?;
        let committed_len = file.metadata().await?.len();
        info!("Sink: {name} appends bids to: {}", path.display());
        Ok(FileSink {
            name: name.to_string(),
            path,
            state: Mutex::new(AppendState {
                file: Some(file),
                committed_len,
            }),
        })
    }

    async fn reopen(&self, state: &mut AppendState) -> Result<(), std::io::Error> {
        let file = open_append(&self.path).await?;
        let len = file.metadata().await?.len();
        if len > state.committed_len {
            warn!(
                "Sink: {} truncates: {} from: {len} to: {} bytes, dropping a partial record.",
                self.name,
                self.path.display(),
                state.committed_len
            );
            file.set_len(state.committed_len).await?;
        } else {
            state.committed_len = len;
        }
        state.file = Some(file);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn open_append(path: &Path) -> Result<File, std::io::Error> {
    OpenOptions::new().create(true).append(true).open(path).await
}

pub fn format_record(event: &BidEvent) -> String {
    format!(
        "{},{},{}\n",
        quote(event.bidder_name()),
        event.price(),
        event.bid_timestamp()
    )
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn classify(error: std::io::Error) -> SinkError {
    match error.kind() {
        ErrorKind::PermissionDenied | ErrorKind::InvalidInput | ErrorKind::InvalidData => {
            SinkError::Fatal(error.to_string())
        }
        _ => SinkError::Retryable(error.to_string()),
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, event: &BidEvent) -> Result<(), SinkError> {
        ensure_non_negative_price(event)?;
        let record = format_record(event);
        let mut state = self.state.lock().await;
        if state.file.is_none() {
            self.reopen(&mut state).await.map_err(classify)?;
        }

        let Some(file) = state.file.as_mut() else {
            return Err(SinkError::Retryable(format!(
                "file: {} is not open",
                self.path.display()
            )));
        };

        let written = async {
            file.write_all(record.as_bytes()).await?;
            file.flush().await?;
            file.sync_data().await
        }
        .await;

        if let Err(error) = written {
            warn!(
                "Sink: {} failed to append to: {}, the file will be reopened: {error}",
                self.name,
                self.path.display()
            );
            state.file = None;
            return Err(classify(error));
        }

        state.committed_len += record.len() as u64;

        debug!("Sink: {} appended bid: {event}", self.name);
        Ok(())
    }
}
