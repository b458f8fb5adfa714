//! File-based session memory — a JSON question file read on demand.
//!
//! The file is re-read on every access, so an editor (or another process)
//! can swap the current question while a session is running.

use async_trait::async_trait;
use hizen_core::error::MemoryError;
use hizen_core::memory::{MemoryProvider, QuestionMemory};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads a `QuestionMemory` JSON document from a file.
#[derive(Debug, Clone)]
pub struct FileMemory {
    path: PathBuf,
}

impl FileMemory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MemoryProvider for FileMemory {
    async fn read_memory(&self) -> Result<QuestionMemory, MemoryError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(MemoryError::Empty),
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        debug!(path = %self.path.display(), bytes = content.len(), "Read question file");

        serde_json::from_str(&content).map_err(|e| {
            MemoryError::Storage(format!("invalid question file {}: {e}", self.path.display()))
        })
    }
}
