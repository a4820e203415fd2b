//! # Log Pipeline
//!
//! Turns a session's audio into the text lines shown in the UI's "Logs" panel.
//!
//! The actual processing (speech-to-text or anything else) is pluggable
//! through [`LogPipeline`]: bytes in, a lazy finite stream of lines out.
//! A stream is consumed once; if it yields an error the rest of it is skipped.
//!
//! ## Key Components:
//! - **LogPipeline**: the capability interface
//! - **ChunkLogPipeline**: default implementation that reports received audio
//! - **SessionWorker**: per-session task that drains pipeline output in order,
//!   forwards it to the gateway and records the session summary

pub mod chunk_log;
pub mod worker;

use crate::audio::AudioArtifact;
use actix_web::web::Bytes;
use futures_util::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

pub use chunk_log::ChunkLogPipeline;
pub use worker::{PipelineJob, SessionOutcome, SessionWorker, WorkerEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineError(pub String);

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for PipelineError {}

/// Lines produced for one unit of audio, in delivery order.
pub type LineStream = BoxStream<'static, Result<String, PipelineError>>;

pub trait LogPipeline: Send + Sync {
    fn name(&self) -> &str;

    /// Incremental feedback for one non-empty chunk (`index` is zero-based).
    fn process_chunk(&self, index: usize, chunk: Bytes) -> LineStream;

    /// Output for the complete recording, produced once at finalize.
    fn process_artifact(&self, artifact: Arc<AudioArtifact>) -> LineStream;
}
