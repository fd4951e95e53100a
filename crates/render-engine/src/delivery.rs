//! Hand-off of finished artifacts to the user.

use std::path::{Path, PathBuf};

use slidereel_common::error::{SlidereelError, SlidereelResult};

/// Receives exactly one finished artifact per successful job.
#[async_trait::async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn deliver(&self, file_name: &str, bytes: &[u8]) -> SlidereelResult<PathBuf>;
}

/// Writes artifacts into a directory, creating it when missing.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait::async_trait]
impl ArtifactSink for DirectorySink {
    async fn deliver(&self, file_name: &str, bytes: &[u8]) -> SlidereelResult<PathBuf> {
        if file_name.is_empty() || file_name.contains(['/', '\\']) {
            return Err(SlidereelError::delivery(format!(
                "invalid artifact name {file_name:?}"
            )));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.dir.join(file_name);
        let partial = self.dir.join(format!("{file_name}.part"));

        // Readers never observe a half-written file under the final name.
        if let Err(e) = tokio::fs::write(&partial, bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(SlidereelError::delivery(format!(
                "failed to write {}: {e}",
                partial.display()
            )));
        }
        tokio::fs::rename(&partial, &target).await.map_err(|e| {
            SlidereelError::delivery(format!("failed to move {}: {e}", target.display()))
        })?;

        tracing::info!(path = %target.display(), bytes = bytes.len(), "Artifact saved");
        Ok(target)
    }
}
