//! Result Persister (C6): atomic, verified artifact writes with bounded
//! retry. C7 must be able to open the file immediately after the
//! `scrape_complete` event fires, so a write is not considered done until
//! it has been read back and parsed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use research_common::persist::{atomic_write_json, verify_json_file};
use research_common::types::Artifact;

use crate::error::ScrapingError;

pub struct ResultPersister {
    storage_root: PathBuf,
    max_attempts: u32,
}

impl ResultPersister {
    pub fn new(storage_root: PathBuf, max_attempts: u32) -> Self {
        Self {
            storage_root,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Write `artifact` atomically under
    /// `batches/<batch_id>/artifacts/<link_id>_<kind>.json`, then re-open
    /// and parse it to confirm durability, retrying with exponential
    /// backoff (50ms, 100ms, 200ms, ...) on failure.
    pub async fn persist(&self, batch_id: &str, artifact: &Artifact) -> Result<PathBuf, ScrapingError> {
        let path =
            research_common::paths::artifact_path(&self.storage_root, batch_id, &artifact.link_id, artifact.link_kind);

        let mut last_err = String::new();
        for attempt in 0..self.max_attempts {
            match self.write_and_verify(&path, artifact) {
                Ok(()) => return Ok(path),
                Err(e) => {
                    last_err = e.to_string();
                    tracing::warn!(attempt, link_id = %artifact.link_id, error = %last_err, "artifact persistence attempt failed");
                    if attempt + 1 < self.max_attempts {
                        let backoff = Duration::from_millis(50 * 2u64.pow(attempt));
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(ScrapingError::PersistenceFailed {
            attempts: self.max_attempts,
            reason: last_err,
        })
    }

    fn write_and_verify(&self, path: &Path, artifact: &Artifact) -> Result<(), research_common::CoreError> {
        atomic_write_json(path, artifact)?;
        let _: Artifact = verify_json_file(path)?;
        Ok(())
    }
}
