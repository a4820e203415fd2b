//! Default pipeline: reports what audio arrived, without interpreting it.

use super::{LineStream, LogPipeline};
use crate::audio::AudioArtifact;
use actix_web::web::Bytes;
use chrono::Local;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;

fn clock() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ChunkLogPipeline;

impl LogPipeline for ChunkLogPipeline {
    fn name(&self) -> &str {
        "chunk-log"
    }

    fn process_chunk(&self, index: usize, chunk: Bytes) -> LineStream {
        let len = chunk.len();
        stream::once(async move {
            Ok(format!("[{}] Chunk {} received ({} bytes)", clock(), index + 1, len))
        })
        .boxed()
    }

    fn process_artifact(&self, artifact: Arc<AudioArtifact>) -> LineStream {
        stream::once(async move {
            Ok(format!(
                "[{}] Recording finalized: {} chunks, {} bytes",
                clock(),
                artifact.chunk_count,
                artifact.len()
            ))
        })
        .boxed()
    }
}
