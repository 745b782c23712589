//! Gateway daemon
//!
//! Wires storage, recording, telemetry ingest and the HTTP surface together
//! for one gateway run, and tears them down in order on shutdown.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::adapters::http::{GatewayHttpConfig, GatewayHttpServer};
use crate::adapters::sqlite::{
    initialize_from_config, SqliteEventRepository, SqliteSequenceAllocator, SqliteSessionRepository,
};
use crate::domain::models::{Config, GatewayMode, SessionStatus};
use crate::domain::ports::{EventRepository, SessionRepository};
use crate::infrastructure::registry::FileRegistrySource;
use crate::services::{
    AgentIdentity, EventRecorder, Gateway, GatewayTarget, HttpForwarder, HubRouter, IngestQueue, RecordingTasks,
    Redactor, TelemetryIngestor,
};

const INGEST_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// One running gateway and everything it records into.
pub struct GatewayDaemon {
    config: Config,
    session_id: String,
    sessions: Arc<dyn SessionRepository>,
    events: Arc<dyn EventRepository>,
    gateway: Arc<Gateway>,
    ingestor: Arc<TelemetryIngestor>,
    ingest: IngestQueue,
}

impl GatewayDaemon {
    /// Open the configured database and assemble the gateway.
    ///
    /// A fresh session id is generated when none is given.
    pub async fn start(config: Config, session_id: Option<String>) -> Result<Self> {
        let pool = initialize_from_config(&config.database)
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;
        Self::with_pool(config, pool, session_id).await
    }

    /// Assemble the gateway on an already migrated pool.
    pub async fn with_pool(config: Config, pool: SqlitePool, session_id: Option<String>) -> Result<Self> {
        let sessions: Arc<dyn SessionRepository> = Arc::new(SqliteSessionRepository::new(pool.clone()));
        let events: Arc<dyn EventRepository> = Arc::new(SqliteEventRepository::new(pool.clone()));
        let sequences = Arc::new(SqliteSequenceAllocator::new(pool));

        let recording = &config.recording;
        let recorder = Arc::new(
            EventRecorder::new(
                Arc::clone(&sessions),
                Arc::clone(&events),
                sequences,
                Redactor::new(&recording.redact_keys, recording.max_payload_bytes),
            )
            .with_enabled(recording.enabled),
        );
        let agent = AgentIdentity::new(&recording.agent_role, &recording.agent_name);

        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if recording.enabled {
            sessions
                .ensure(&session_id)
                .await
                .with_context(|| format!("Failed to open session {session_id}"))?;
        }

        let target = match config.gateway.mode {
            GatewayMode::Hub => GatewayTarget::Hub {
                registry: Arc::new(FileRegistrySource::new(&config.gateway.registry_path)),
            },
            GatewayMode::Legacy => GatewayTarget::Legacy {
                url: config
                    .gateway
                    .upstream_url
                    .clone()
                    .context("Legacy mode requires gateway.upstream_url")?,
                headers: config.gateway.upstream_headers.clone(),
            },
        };

        let router = HubRouter::new(
            HttpForwarder::new(Duration::from_millis(config.gateway.request_timeout_ms)),
            Duration::from_millis(config.gateway.list_timeout_ms),
        );
        let tasks = Arc::new(RecordingTasks::new());
        let gateway = Arc::new(
            Gateway::new(target, router, Arc::clone(&recorder), session_id.clone(), agent.clone())
                .with_tasks(tasks),
        );

        let ingestor = Arc::new(TelemetryIngestor::new(recorder, session_id.clone(), agent));
        let ingest = IngestQueue::start(Arc::clone(&ingestor));

        info!(
            session_id = %session_id,
            mode = gateway.target().name(),
            recording = config.recording.enabled,
            "gateway assembled"
        );

        Ok(Self {
            config,
            session_id,
            sessions,
            events,
            gateway,
            ingestor,
            ingest,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    fn server(&self) -> GatewayHttpServer {
        GatewayHttpServer::new(
            Arc::clone(&self.gateway),
            self.ingest.sender(),
            GatewayHttpConfig::from(&self.config.gateway),
        )
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self
            .server()
            .bind()
            .await
            .with_context(|| format!("Failed to bind {}:{}", self.config.gateway.host, self.config.gateway.port))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on `listener` until `shutdown` resolves, then finish the session.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let served = self.server().serve_with_shutdown(listener, shutdown).await;
        let finished = self.finish().await;
        served.context("Gateway server failed")?;
        finished
    }

    /// Flush pending recordings and close the gateway's session.
    ///
    /// Calls still running at this point are marked cancelled, including
    /// stdio calls reported through the telemetry ingress. Sessions opened by
    /// `wrap` processes stay active; they belong to those processes.
    pub async fn finish(self) -> Result<()> {
        let Self {
            config,
            session_id,
            sessions,
            events,
            gateway,
            ingestor,
            ingest,
        } = self;

        if tokio::time::timeout(INGEST_DRAIN_TIMEOUT, ingest.close()).await.is_err() {
            warn!("telemetry ingest not drained in time");
        }
        gateway.tasks().drain().await;

        if !config.recording.enabled {
            return Ok(());
        }

        let abandoned = ingestor.cancel_pending().await;
        if abandoned > 0 {
            warn!(abandoned, "unanswered stdio calls cancelled at shutdown");
        }

        let now = Utc::now();
        let cancelled = events
            .cancel_running(&session_id, now)
            .await
            .context("Failed to cancel running events")?;
        if cancelled > 0 {
            warn!(session_id = %session_id, cancelled, "running calls cancelled at shutdown");
        }
        sessions
            .end(&session_id, SessionStatus::Completed, now)
            .await
            .context("Failed to end session")?;

        info!(session_id = %session_id, "gateway session completed");
        Ok(())
    }
}

/// Resolves on the first Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::EventStatus;

    #[tokio::test]
    async fn test_daemon_opens_and_completes_session() {
        let pool = create_migrated_test_pool().await.unwrap();
        let sessions = SqliteSessionRepository::new(pool.clone());

        let daemon = GatewayDaemon::with_pool(Config::default(), pool, Some("daemon-1".to_string()))
            .await
            .unwrap();
        assert_eq!(daemon.session_id(), "daemon-1");
        assert_eq!(daemon.gateway().target().name(), "hub");

        let open = sessions.get("daemon-1").await.unwrap().unwrap();
        assert_eq!(open.status, SessionStatus::Active);

        daemon.finish().await.unwrap();
        let closed = sessions.get("daemon-1").await.unwrap().unwrap();
        assert_eq!(closed.status, SessionStatus::Completed);
        assert!(closed.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_finish_cancels_calls_left_running() {
        let pool = create_migrated_test_pool().await.unwrap();
        let events = SqliteEventRepository::new(pool.clone());

        let daemon = GatewayDaemon::with_pool(Config::default(), pool, Some("daemon-2".to_string()))
            .await
            .unwrap();
        let sender = daemon.ingest.sender();
        sender
            .send(serde_json::json!({
                "direction": "request",
                "sessionId": "daemon-2",
                "raw": r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"slow","arguments":{}}}"#
            }))
            .unwrap();
        drop(sender);

        daemon.finish().await.unwrap();

        let recorded = events.list_by_session("daemon-2").await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].status, EventStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_finish_cancels_unanswered_stdio_calls_in_wrap_sessions() {
        let pool = create_migrated_test_pool().await.unwrap();
        let events = SqliteEventRepository::new(pool.clone());
        let sessions = SqliteSessionRepository::new(pool.clone());

        let daemon = GatewayDaemon::with_pool(Config::default(), pool, Some("daemon-3".to_string()))
            .await
            .unwrap();
        let sender = daemon.ingest.sender();
        sender
            .send(serde_json::json!({
                "direction": "request",
                "sessionId": "wrap-7",
                "upstreamKey": "fs",
                "raw": r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"name":"read_file"}}"#
            }))
            .unwrap();
        drop(sender);

        daemon.finish().await.unwrap();

        let recorded = events.list_by_session("wrap-7").await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].status, EventStatus::Cancelled);
        assert!(recorded[0].ended_at.is_some());

        let wrap = sessions.get("wrap-7").await.unwrap().unwrap();
        assert_eq!(wrap.status, SessionStatus::Active);
        let own = sessions.get("daemon-3").await.unwrap().unwrap();
        assert_eq!(own.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_disabled_recording_creates_no_session() {
        let pool = create_migrated_test_pool().await.unwrap();
        let sessions = SqliteSessionRepository::new(pool.clone());

        let mut config = Config::default();
        config.recording.enabled = false;
        let daemon = GatewayDaemon::with_pool(config, pool, Some("quiet".to_string())).await.unwrap();
        daemon.finish().await.unwrap();

        assert!(sessions.get("quiet").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_legacy_without_upstream_is_rejected() {
        let pool = create_migrated_test_pool().await.unwrap();
        let mut config = Config::default();
        config.gateway.mode = GatewayMode::Legacy;

        let err = GatewayDaemon::with_pool(config, pool, None).await.err().unwrap();
        assert!(err.to_string().contains("upstream_url"));
    }
}
