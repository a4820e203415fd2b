//! Writes finalized recordings to disk when `audio.artifact_dir` is set.

use crate::audio::assembler::AudioArtifact;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
    extension: String,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save the artifact as `<dir>/<YYYYmmdd_HHMMSS>_<session>.<ext>`.
    pub async fn save(&self, session_id: &str, artifact: &AudioArtifact) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let short_id: String = session_id.chars().take(8).collect();
        let file_name = format!(
            "{}_{}.{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            short_id,
            self.extension
        );
        let path = self.dir.join(file_name);

        tokio::fs::write(&path, &artifact.bytes).await?;
        debug!(path = %path.display(), bytes = artifact.len(), "Saved audio artifact");

        Ok(path)
    }
}
