//! Line telemetry produced by the stdio proxy.
//!
//! Records are handed to a [`TelemetryHandle`], which never blocks. A single
//! background worker delivers them to every configured sink; sink failures
//! are logged and the record is dropped for that sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::protocol::MessageMetadata;

/// Which way a line travelled through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Outer stdin to child stdin
    Request,
    /// Child stdout to outer stdout
    Response,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "request" => Some(Self::Request),
            "response" => Some(Self::Response),
            _ => None,
        }
    }
}

/// One observed protocol line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// The line as text, without its trailing newline.
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_key: Option<String>,
}

/// Session and provider tags stamped on every record of one proxy run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryTags {
    pub session_id: Option<String>,
    pub upstream_key: Option<String>,
}

impl TelemetryRecord {
    /// Build a record for `line`. Metadata is absent when the line did not
    /// parse as JSON-RPC.
    pub fn observe(direction: Direction, line: &[u8], metadata: Option<MessageMetadata>, tags: &TelemetryTags) -> Self {
        let raw = String::from_utf8_lossy(line);
        let raw = raw.trim_end_matches(['\n', '\r']).to_string();
        let metadata = metadata.unwrap_or_default();

        Self {
            timestamp: Utc::now(),
            direction,
            raw,
            method: metadata.method,
            id: metadata.id,
            is_error: metadata.is_error,
            session_id: tags.session_id.clone(),
            upstream_key: tags.upstream_key.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telemetry endpoint returned HTTP {0}")]
    Status(u16),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, record: &TelemetryRecord) -> Result<(), SinkError>;
}

/// Appends one JSON object per line to a file.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TelemetrySink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn send(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }

        if let Some(file) = guard.as_mut() {
            file.write_all(&line).await?;
            file.flush().await?;
        }
        Ok(())
    }
}

/// POSTs each record to the daemon's telemetry ingress.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(record).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Non-blocking entry point into the dispatcher.
#[derive(Debug, Clone)]
pub struct TelemetryHandle {
    tx: mpsc::UnboundedSender<TelemetryRecord>,
}

impl TelemetryHandle {
    pub fn emit(&self, record: TelemetryRecord) {
        if self.tx.send(record).is_err() {
            tracing::debug!("telemetry dispatcher closed; record dropped");
        }
    }
}

pub struct TelemetryDispatcher {
    handle: TelemetryHandle,
    worker: JoinHandle<u64>,
}

impl TelemetryDispatcher {
    /// Start the delivery worker. With no sinks records are consumed and dropped.
    pub fn start(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<TelemetryRecord>();

        let worker = tokio::spawn(async move {
            let mut delivered = 0u64;
            while let Some(record) = rx.recv().await {
                for sink in &sinks {
                    match sink.send(&record).await {
                        Ok(()) => delivered += 1,
                        Err(e) => tracing::warn!(sink = sink.name(), error = %e, "telemetry delivery failed"),
                    }
                }
            }
            delivered
        });

        Self {
            handle: TelemetryHandle { tx },
            worker,
        }
    }

    pub fn handle(&self) -> TelemetryHandle {
        self.handle.clone()
    }

    /// Stop accepting records and wait up to `within` for queued ones.
    ///
    /// Records still held by other handles' senders keep the worker alive;
    /// those handles must be dropped first.
    pub async fn shutdown(self, within: Duration) {
        let Self { handle, mut worker } = self;
        drop(handle);

        match tokio::time::timeout(within, &mut worker).await {
            Ok(Ok(delivered)) => tracing::debug!(delivered, "telemetry dispatcher drained"),
            Ok(Err(e)) => tracing::warn!(error = %e, "telemetry worker failed"),
            Err(_) => {
                tracing::warn!("telemetry queue not drained in time; remaining records dropped");
                worker.abort();
            }
        }
    }
}
