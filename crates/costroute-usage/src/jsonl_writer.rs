//! JSONL usage log
//!
//! Records are queued on a bounded channel and appended to the log file by a
//! background task, one JSON object per line. `emit` never waits on I/O; when
//! the queue is full the record is dropped with a warning.

use crate::{UsageLogError, UsageLogResult};
use costroute_core::{UsageRecord, UsageSink};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Configuration for the usage log writer
#[derive(Debug, Clone)]
pub struct UsageLogConfig {
    /// Maximum records to buffer before writing
    pub batch_size: usize,
    /// Maximum time a record waits before being written (milliseconds)
    pub batch_timeout_ms: u64,
    /// Size of the channel buffer
    pub channel_buffer_size: usize,
}

impl Default for UsageLogConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout_ms: 100,
            channel_buffer_size: 10_000,
        }
    }
}

/// Append-only JSONL usage log
pub struct JsonlUsageLog {
    path: PathBuf,
    tx: Mutex<Option<mpsc::Sender<UsageRecord>>>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for JsonlUsageLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlUsageLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl JsonlUsageLog {
    /// Open (or create) the log file and start the writer task
    pub async fn open(path: impl Into<PathBuf>) -> UsageLogResult<Self> {
        Self::with_config(path, UsageLogConfig::default()).await
    }

    pub async fn with_config(path: impl Into<PathBuf>, config: UsageLogConfig) -> UsageLogResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        tracing::info!(path = %path.display(), "Usage log opened");

        let (tx, rx) = mpsc::channel(config.channel_buffer_size.max(1));
        let worker_handle = tokio::spawn(worker_loop(rx, file, config));

        Ok(Self {
            path,
            tx: Mutex::new(Some(tx)),
            worker_handle: Mutex::new(Some(worker_handle)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a record. Returns false if it was dropped.
    pub fn record(&self, record: &UsageRecord) -> bool {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        let Some(tx) = tx.as_ref() else {
            tracing::warn!("Usage log already shut down, dropping record");
            return false;
        };

        match tx.try_send(record.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Usage log buffer full, dropping record");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!("Usage log channel closed");
                false
            }
        }
    }

    /// Stop accepting records, then wait for everything queued to be written
    pub async fn shutdown(&self) -> UsageLogResult<()> {
        // Dropping the sender ends the worker loop once the queue drains
        drop(self.tx.lock().unwrap_or_else(|p| p.into_inner()).take());

        let handle = self
            .worker_handle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| UsageLogError::Worker(e.to_string()))?;
        }

        tracing::info!(path = %self.path.display(), "Usage log shutdown complete");
        Ok(())
    }
}

impl UsageSink for JsonlUsageLog {
    fn emit(&self, record: &UsageRecord) {
        self.record(record);
    }
}

impl Drop for JsonlUsageLog {
    fn drop(&mut self) {
        let running = self
            .worker_handle
            .get_mut()
            .map(|h| h.is_some())
            .unwrap_or(false);
        if running {
            tracing::warn!(
                "JsonlUsageLog dropped without calling shutdown(). \
                 Pending records may not be written."
            );
        }
    }
}

async fn worker_loop(mut rx: mpsc::Receiver<UsageRecord>, mut file: File, config: UsageLogConfig) {
    let mut buffer = Vec::with_capacity(config.batch_size);
    let mut interval = tokio::time::interval(Duration::from_millis(config.batch_timeout_ms.max(1)));

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(record) => {
                    buffer.push(record);
                    if buffer.len() >= config.batch_size {
                        flush_buffer(&mut file, &mut buffer).await;
                    }
                }
                None => {
                    // All senders gone, write what is left and exit
                    flush_buffer(&mut file, &mut buffer).await;
                    break;
                }
            },
            _ = interval.tick() => {
                flush_buffer(&mut file, &mut buffer).await;
            }
        }
    }

    tracing::debug!("Usage log worker loop exited");
}

async fn flush_buffer(file: &mut File, buffer: &mut Vec<UsageRecord>) {
    if buffer.is_empty() {
        return;
    }

    let records = std::mem::take(buffer);
    if let Err(e) = write_batch(file, &records).await {
        // Write failures never propagate back to request handling
        tracing::error!(error = %e, record_count = records.len(), "Failed to write usage records");
    }
}

async fn write_batch(file: &mut File, records: &[UsageRecord]) -> UsageLogResult<()> {
    let mut lines = Vec::new();
    for record in records {
        serde_json::to_writer(&mut lines, record)?;
        lines.push(b'\n');
    }
    file.write_all(&lines).await?;
    file.flush().await?;
    Ok(())
}
