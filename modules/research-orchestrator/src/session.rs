//! Research Session (C8): the scratchpad and phase-artifact store for one
//! research run, with a cached cumulative summary so the per-step O(n)
//! rebuild amortizes to O(1) across a run.

use std::path::PathBuf;
use std::sync::Mutex;

use research_common::types::{Findings, PhaseArtifact, ScratchpadEntry, SessionRecord};

use crate::error::OrchestratorError;

#[derive(Debug)]
struct Cache {
    text: String,
    valid: bool,
}

#[derive(Debug)]
pub struct ResearchSession {
    record: Mutex<SessionRecord>,
    cache: Mutex<Cache>,
    storage_root: PathBuf,
}

impl ResearchSession {
    pub fn new(session_id: impl Into<String>, batch_id: impl Into<String>, storage_root: PathBuf) -> Self {
        Self {
            record: Mutex::new(SessionRecord::new(session_id, batch_id)),
            cache: Mutex::new(Cache { text: String::new(), valid: false }),
            storage_root,
        }
    }

    pub fn session_id(&self) -> String {
        self.record.lock().expect("session lock poisoned").session_id.clone()
    }

    /// Appends a scratchpad entry; re-running the same `step_id` replaces
    /// it in place (idempotent re-run of a step). Invalidates the
    /// cumulative-summary cache and autosaves when `autosave` is set.
    pub fn update_scratchpad(
        &self,
        step_id: u32,
        findings: Findings,
        insights: impl Into<String>,
        confidence: f64,
        sources: Vec<String>,
        autosave: bool,
    ) -> Result<(), OrchestratorError> {
        {
            let mut record = self.record.lock().expect("session lock poisoned");
            record.scratchpad.insert(
                step_id,
                ScratchpadEntry {
                    step_id,
                    findings,
                    insights: insights.into(),
                    confidence,
                    sources,
                    created_at: chrono::Utc::now(),
                },
            );
        }
        self.cache.lock().expect("cache lock poisoned").valid = false;

        if autosave {
            self.save()?;
        }
        Ok(())
    }

    pub fn append_phase_artifact(&self, phase: impl Into<String>, payload: serde_json::Value) {
        let mut record = self.record.lock().expect("session lock poisoned");
        record.phase_artifacts.push(PhaseArtifact {
            phase: phase.into(),
            payload,
            created_at: chrono::Utc::now(),
        });
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: serde_json::Value) {
        self.record.lock().expect("session lock poisoned").metadata.insert(key.into(), value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.record.lock().expect("session lock poisoned").metadata.get(key).cloned()
    }

    /// Returns the cached cumulative summary if still valid; otherwise
    /// rebuilds by concatenating a structured projection of every
    /// scratchpad entry in `step_id` order, caches it, and returns.
    pub fn get_cumulative_summary(&self) -> String {
        {
            let cache = self.cache.lock().expect("cache lock poisoned");
            if cache.valid {
                return cache.text.clone();
            }
        }

        let rebuilt = {
            let record = self.record.lock().expect("session lock poisoned");
            let mut text = String::new();
            for entry in record.scratchpad.values() {
                text.push_str(&format!(
                    "## Step {}\n{}\nInsights: {}\nConfidence: {:.2}\n\n",
                    entry.step_id, entry.findings.summary, entry.insights, entry.confidence
                ));
            }
            text
        };

        let mut cache = self.cache.lock().expect("cache lock poisoned");
        cache.text = rebuilt.clone();
        cache.valid = true;
        rebuilt
    }

    pub fn snapshot(&self) -> SessionRecord {
        self.record.lock().expect("session lock poisoned").clone()
    }

    /// Flushes the session to disk atomically. Called by the orchestrator
    /// at well-defined boundaries, not after every window.
    pub fn save(&self) -> Result<(), OrchestratorError> {
        let record = self.snapshot();
        let path = research_common::paths::session_path(&self.storage_root, &record.session_id);
        research_common::persist::atomic_write_json(&path, &record)
            .map_err(|e| OrchestratorError::PhaseFailed { phase: "save".into(), reason: e.to_string() })
    }

    /// Reads a session from disk. The cumulative-summary cache always
    /// starts invalid after a load.
    pub fn load(session_id: &str, storage_root: PathBuf) -> Result<Self, OrchestratorError> {
        let path = research_common::paths::session_path(&storage_root, session_id);
        let record: SessionRecord = research_common::persist::verify_json_file(&path)
            .map_err(|_| OrchestratorError::SessionNotFound(session_id.to_string()))?;
        Ok(Self {
            record: Mutex::new(record),
            cache: Mutex::new(Cache { text: String::new(), valid: false }),
            storage_root,
        })
    }
}
