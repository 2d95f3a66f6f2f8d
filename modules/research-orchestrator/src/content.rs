//! Content retrieval for Phase 3 steps: prefers C7 summaries, falls back
//! to raw C6 artifacts when no summary exists yet for the batch.

use std::path::PathBuf;

use research_common::paths::batch_dir;

use crate::error::OrchestratorError;

pub trait ContentProvider: Send + Sync {
    fn gather(&self, required_data: &str) -> Result<String, OrchestratorError>;
}

pub struct StorageContentProvider {
    storage_root: PathBuf,
    batch_id: String,
}

impl StorageContentProvider {
    pub fn new(storage_root: PathBuf, batch_id: impl Into<String>) -> Self {
        Self { storage_root, batch_id: batch_id.into() }
    }

    fn read_dir_as_text(&self, subdir: &str) -> Vec<String> {
        let dir = batch_dir(&self.storage_root, &self.batch_id).join(subdir);
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return out;
        };
        for entry in entries.flatten() {
            if let Ok(bytes) = std::fs::read(entry.path()) {
                if let Ok(text) = String::from_utf8(bytes) {
                    out.push(text);
                }
            }
        }
        out
    }
}

impl ContentProvider for StorageContentProvider {
    /// `required_data` is a symbolic description chosen by the planning
    /// model, not a lookup key; content relevance is the executing model's
    /// job once it sees everything available for the batch.
    fn gather(&self, required_data: &str) -> Result<String, OrchestratorError> {
        let summaries = self.read_dir_as_text("summaries");
        let body = if !summaries.is_empty() {
            summaries.join("\n\n")
        } else {
            self.read_dir_as_text("artifacts").join("\n\n")
        };
        if body.is_empty() {
            return Err(OrchestratorError::PhaseFailed {
                phase: "execute".into(),
                reason: format!("no content available for required_data `{required_data}`"),
            });
        }
        Ok(body)
    }
}
