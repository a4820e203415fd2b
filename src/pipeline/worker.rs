//! # Session Worker
//!
//! One task per recording session. The gateway pushes [`PipelineJob`]s onto
//! an unbounded queue and keeps reading frames; the worker drains the jobs in
//! order, runs the pipeline, and sends every produced line back as a
//! [`WorkerEvent::Line`] before it touches the next job. That single consumer
//! is what keeps lines in production order on the client.
//!
//! ## Lifecycle:
//! - Job queue closed without a `Finalize` job → session abandoned, nothing recorded
//! - `Finalize` job → optional artifact save, artifact lines, history record,
//!   then exactly one [`WorkerEvent::Finished`]

use super::{LineStream, LogPipeline};
use crate::audio::{ArtifactWriter, AudioArtifact};
use crate::history::{HistoryStore, StoreError};
use actix_web::web::Bytes;
use chrono::Local;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Most recent log lines kept in a history summary.
const SUMMARY_LINE_LIMIT: usize = 20;

#[derive(Debug)]
pub enum PipelineJob {
    Chunk { index: usize, data: Bytes },
    Finalize(AudioArtifact),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Line(String),
    Finished(SessionOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    /// History entry created for the session, if recording succeeded
    pub entry_id: Option<u64>,
    pub lines_emitted: usize,
    pub pipeline_failure: Option<String>,
    pub store_error: Option<String>,
}

impl SessionOutcome {
    pub fn is_recorded(&self) -> bool {
        self.entry_id.is_some()
    }
}

/// Text stored in history for a finished session.
///
/// Format: `[<local time>] session <id8>: <n> chunks, <bytes> bytes | line | line ...`
/// with a trailing `PIPELINE FAILED: <reason>` marker when processing broke.
fn render_summary(
    session_id: &str,
    chunk_count: usize,
    byte_count: usize,
    lines: &[String],
    failure: Option<&str>,
) -> String {
    let short_id: String = session_id.chars().take(8).collect();
    let mut parts = vec![format!(
        "[{}] session {}: {} chunks, {} bytes",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        short_id,
        chunk_count,
        byte_count
    )];

    let skipped = lines.len().saturating_sub(SUMMARY_LINE_LIMIT);
    if skipped > 0 {
        parts.push(format!("... {} earlier lines", skipped));
    }
    parts.extend(lines[skipped..].iter().cloned());

    if let Some(reason) = failure {
        parts.push(format!("PIPELINE FAILED: {}", reason));
    }

    parts.join(" | ")
}

pub struct SessionWorker {
    session_id: String,
    pipeline: Arc<dyn LogPipeline>,
    history: Arc<HistoryStore>,
    artifacts: Option<ArtifactWriter>,
    lines: Vec<String>,
    failure: Option<String>,
}

impl SessionWorker {
    pub fn new(session_id: String, pipeline: Arc<dyn LogPipeline>, history: Arc<HistoryStore>) -> Self {
        Self {
            session_id,
            pipeline,
            history,
            artifacts: None,
            lines: Vec::new(),
            failure: None,
        }
    }

    pub fn with_artifacts(mut self, writer: Option<ArtifactWriter>) -> Self {
        self.artifacts = writer;
        self
    }

    pub fn spawn(
        self,
        jobs: UnboundedReceiver<PipelineJob>,
        events: UnboundedSender<WorkerEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(jobs, events))
    }

    pub async fn run(
        mut self,
        mut jobs: UnboundedReceiver<PipelineJob>,
        events: UnboundedSender<WorkerEvent>,
    ) {
        while let Some(job) = jobs.recv().await {
            match job {
                PipelineJob::Chunk { index, data } => {
                    if self.failure.is_some() {
                        continue;
                    }
                    let stream = self.pipeline.process_chunk(index, data);
                    self.forward(stream, &events).await;
                }
                PipelineJob::Finalize(artifact) => {
                    let outcome = self.finalize(artifact, &events).await;
                    let _ = events.send(WorkerEvent::Finished(outcome));
                    return;
                }
            }
        }

        debug!(session_id = %self.session_id, "Job queue closed before finalize, nothing recorded");
    }

    async fn forward(&mut self, mut stream: LineStream, events: &UnboundedSender<WorkerEvent>) {
        while let Some(item) = stream.next().await {
            match item {
                Ok(line) => self.emit(line, events),
                Err(err) => {
                    warn!(
                        session_id = %self.session_id,
                        pipeline = self.pipeline.name(),
                        error = %err,
                        "Pipeline failed"
                    );
                    self.failure = Some(err.to_string());
                    break;
                }
            }
        }
    }

    fn emit(&mut self, line: String, events: &UnboundedSender<WorkerEvent>) {
        // The gateway may be gone after the stop sentinel; the summary is still recorded.
        let _ = events.send(WorkerEvent::Line(line.clone()));
        self.lines.push(line);
    }

    async fn finalize(
        &mut self,
        artifact: AudioArtifact,
        events: &UnboundedSender<WorkerEvent>,
    ) -> SessionOutcome {
        let chunk_count = artifact.chunk_count;
        let byte_count = artifact.len();

        if let Some(writer) = self.artifacts.clone() {
            match writer.save(&self.session_id, &artifact).await {
                Ok(path) => self.emit(format!("Audio saved: {}", path.display()), events),
                Err(err) => {
                    error!(session_id = %self.session_id, error = %err, "Failed to save audio artifact");
                    if self.failure.is_none() {
                        self.failure = Some(format!("failed to save audio: {}", err));
                    }
                }
            }
        }

        if self.failure.is_none() {
            let stream = self.pipeline.process_artifact(Arc::new(artifact));
            self.forward(stream, events).await;
        }

        let summary = render_summary(
            &self.session_id,
            chunk_count,
            byte_count,
            &self.lines,
            self.failure.as_deref(),
        );

        let history = self.history.clone();
        let recorded = tokio::task::spawn_blocking(move || history.record(summary))
            .await
            .unwrap_or_else(|err| Err(StoreError::Unavailable(format!("record task failed: {}", err))));

        let (entry_id, store_error) = match recorded {
            Ok(id) => {
                info!(
                    session_id = %self.session_id,
                    entry_id = id,
                    chunks = chunk_count,
                    bytes = byte_count,
                    lines = self.lines.len(),
                    "Session recorded to history"
                );
                (Some(id), None)
            }
            Err(err) => {
                error!(session_id = %self.session_id, error = %err, "Failed to record session history");
                (None, Some(err.to_string()))
            }
        };

        SessionOutcome {
            entry_id,
            lines_emitted: self.lines.len(),
            pipeline_failure: self.failure.clone(),
            store_error,
        }
    }
}
