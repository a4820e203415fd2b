//! # Application State Management
//!
//! Shared state handed to every HTTP handler and gateway actor through
//! `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: effective configuration, read-only after start-up
//! - **history**: the process-wide [`HistoryStore`], created once and injected
//! - **sessions**: registry of live recording sessions
//! - **pipeline**: the log pipeline every session worker runs
//! - **metrics**: request and session counters
//!
//! Cloning `AppState` is cheap: every field is an `Arc` or a handle around one.

use crate::audio::{ArtifactWriter, SessionManager};
use crate::config::AppConfig;
use crate::history::{HistoryStore, StoreError};
use crate::pipeline::{ChunkLogPipeline, LogPipeline};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub history: Arc<HistoryStore>,
    pub sessions: SessionManager,
    pub pipeline: Arc<dyn LogPipeline>,
    pub artifacts: Option<ArtifactWriter>,
    pub start_time: Instant,
}

/// Counters collected across requests and sessions.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
    pub sessions: SessionMetrics,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Gateway counters.
#[derive(Debug, Default, Clone)]
pub struct SessionMetrics {
    pub opened: u64,
    pub finalized: u64,
    pub abandoned: u64,
    /// Sessions refused at the upgrade because the registry was full
    pub refused: u64,
    /// Malformed frames and frames received while not open
    pub frames_rejected: u64,
    pub lines_forwarded: u64,
    pub bytes_received: u64,
}

/// Session lifecycle events recorded by the gateway.
#[derive(Debug, Clone, Copy)]
pub enum SessionEvent {
    Opened,
    Finalized,
    Abandoned,
    Refused,
    FrameRejected,
    LineForwarded,
    BytesReceived(usize),
}

impl AppState {
    /// Build state with the default [`ChunkLogPipeline`].
    pub fn new(config: AppConfig) -> Result<Self, StoreError> {
        Self::with_pipeline(config, Arc::new(ChunkLogPipeline))
    }

    pub fn with_pipeline(config: AppConfig, pipeline: Arc<dyn LogPipeline>) -> Result<Self, StoreError> {
        let history = HistoryStore::from_config(&config.history)?;
        let artifacts = config
            .audio
            .artifact_dir
            .as_ref()
            .map(|dir| ArtifactWriter::new(dir, config.audio.artifact_extension.clone()));

        Ok(Self {
            sessions: SessionManager::new(config.performance.max_concurrent_sessions),
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            history: Arc::new(history),
            pipeline,
            artifacts,
            start_time: Instant::now(),
        })
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    // Counters stay usable after a panic elsewhere; a poisoned lock is recovered.
    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record timing for one request to `endpoint` (e.g. "GET /history").
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn record_session_event(&self, event: SessionEvent) {
        let mut metrics = self.metrics_mut();
        let sessions = &mut metrics.sessions;
        match event {
            SessionEvent::Opened => sessions.opened += 1,
            SessionEvent::Finalized => sessions.finalized += 1,
            SessionEvent::Abandoned => sessions.abandoned += 1,
            SessionEvent::Refused => sessions.refused += 1,
            SessionEvent::FrameRejected => sessions.frames_rejected += 1,
            SessionEvent::LineForwarded => sessions.lines_forwarded += 1,
            SessionEvent::BytesReceived(n) => sessions.bytes_received += n as u64,
        }
    }

    /// Copy of the current metrics, so no lock is held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
