// src/sinks/file.rs - Appends one delimited line per window to a log file

use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::{SinkError, WindowSink};
use crate::config::FileSinkConfig;
use crate::types::WindowStat;

/// Append-only window log: `timestamp,positive,negative\n`
pub struct FileSink {
    path: PathBuf,
    file: File,
    delimiter: char,
    write_retries: u32,
    retry_backoff: Duration,
    records_written: u64,
}

impl FileSink {
    /// Open (or create) the log in append mode. Failing here is fatal to the caller.
    pub async fn open(config: &FileSinkConfig) -> Result<Self, SinkError> {
        let file = open_append(&config.path).await?;
        info!("Appending windows to {}", config.path.display());

        Ok(Self {
            path: config.path.clone(),
            file,
            delimiter: config.delimiter,
            write_retries: config.write_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            records_written: 0,
        })
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    async fn write_record(&mut self, record: &[u8]) -> std::io::Result<()> {
        self.file.write_all(record).await?;
        self.file.flush().await
    }

    async fn sync(&mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }

    /// Write one record, retrying with doubling backoff on I/O errors
    pub async fn append(&mut self, stat: &WindowStat) -> Result<(), SinkError> {
        let record = stat.to_record(self.delimiter);
        let attempts = self.write_retries + 1;
        let mut backoff = self.retry_backoff;
        let mut attempt = 1;

        loop {
            match self.write_record(record.as_bytes()).await {
                Ok(()) => {
                    self.records_written += 1;
                    debug!("Wrote window {} to {}", stat.timestamp, self.path.display());
                    return Ok(());
                }
                Err(source) if attempt >= attempts => {
                    return Err(SinkError::Write {
                        path: self.path.clone(),
                        attempts,
                        source,
                    });
                }
                Err(e) => {
                    warn!(
                        "Write to {} failed (attempt {}/{}): {}, retrying in {:?}",
                        self.path.display(),
                        attempt,
                        attempts,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;

                    // A broken handle will not heal; reopen before the next try
                    match open_append(&self.path).await {
                        Ok(file) => self.file = file,
                        Err(e) => debug!("Reopen of {} failed: {}", self.path.display(), e),
                    }
                }
            }
        }
    }
}

async fn open_append(path: &Path) -> Result<File, SinkError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl WindowSink for FileSink {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn deliver(&mut self, stat: &WindowStat) -> Result<(), SinkError> {
        self.append(stat).await
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        self.sync().await.map_err(|source| SinkError::Write {
            path: self.path.clone(),
            attempts: 1,
            source,
        })?;
        info!("Closed {} after {} records", self.path.display(), self.records_written);
        Ok(())
    }
}
