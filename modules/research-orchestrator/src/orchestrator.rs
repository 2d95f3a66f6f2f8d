//! Research Orchestrator (C12): sequences Phase 0.5 through Phase 4,
//! owns the session-scoped cancel flag, and emits a heartbeat when a
//! phase runs long without producing a stream token.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use research_common::event::EventPayload;
use research_events::EventBus;
use research_llm::{EmbeddingClient, StreamingLlmClient};
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::cancel::CancelToken;
use crate::content::{ContentProvider, StorageContentProvider};
use crate::error::OrchestratorError;
use crate::novelty::NoveltyFilter;
use crate::phases::{run_discover_phase, run_execute_phase, run_plan_phase, run_role_phase, run_synthesize_phase};
use crate::phases::{PhaseContext, UserIntent};
use crate::session::ResearchSession;

pub struct OrchestratorConfig {
    pub model: String,
    pub window_size_chars: usize,
    pub novelty_threshold: f64,
    pub heartbeat: Duration,
    pub storage_root: PathBuf,
}

pub struct ResearchOrchestrator {
    bus: EventBus,
    llm: Arc<dyn StreamingLlmClient>,
    embeddings: Arc<dyn EmbeddingClient>,
    config: OrchestratorConfig,
    cancel: CancelToken,
}

impl ResearchOrchestrator {
    pub fn new(
        bus: EventBus,
        llm: Arc<dyn StreamingLlmClient>,
        embeddings: Arc<dyn EmbeddingClient>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { bus, llm, embeddings, config, cancel: CancelToken::new() }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs a full research session end to end and returns the final
    /// Markdown report. `batch_id` identifies the scraped content this
    /// session researches over.
    pub async fn run(
        &self,
        session_id: &str,
        batch_id: &str,
        data_overview: &str,
        pre_role_guidance: &str,
    ) -> Result<String, OrchestratorError> {
        let session = Arc::new(ResearchSession::new(session_id, batch_id, self.config.storage_root.clone()));
        session.set_metadata("user_guidance", serde_json::json!(pre_role_guidance));

        let novelty = Arc::new(AsyncMutex::new(NoveltyFilter::new(self.embeddings.clone(), self.config.novelty_threshold)));
        let last_token = Arc::new(StdMutex::new(Instant::now()));
        let ctx = PhaseContext {
            session: session.clone(),
            bus: self.bus.clone(),
            batch_id: batch_id.to_string(),
            llm: self.llm.clone(),
            model: self.config.model.clone(),
            window_size_chars: self.config.window_size_chars,
            cancel: self.cancel.clone(),
            novelty,
            last_token: last_token.clone(),
        };

        let heartbeat = self.spawn_heartbeat(batch_id.to_string(), last_token);
        let result = self.run_phases(&ctx, pre_role_guidance, data_overview).await;
        heartbeat.abort();

        session.save()?;
        result
    }

    async fn run_phases(
        &self,
        ctx: &PhaseContext,
        pre_role_guidance: &str,
        data_overview: &str,
    ) -> Result<String, OrchestratorError> {
        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        run_role_phase(ctx, data_overview, pre_role_guidance).await;
        ctx.session.save()?;

        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let mut intent = UserIntent { user_guidance: pre_role_guidance.to_string(), user_context: None };
        let (goal, amendment) = run_discover_phase(ctx, &intent, data_overview).await?;
        ctx.session.save()?;
        intent.user_context = amendment;

        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let plan = run_plan_phase(ctx, &intent, &goal, data_overview).await?;
        ctx.session.save()?;

        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let content: Box<dyn ContentProvider> =
            Box::new(StorageContentProvider::new(self.config.storage_root.clone(), ctx.batch_id.clone()));
        run_execute_phase(ctx, &intent, &plan, content.as_ref()).await?;
        ctx.session.save()?;

        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let report = run_synthesize_phase(ctx, &intent).await?;
        ctx.session.save()?;

        let path = research_common::paths::report_path(&self.config.storage_root, &ctx.session.session_id());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OrchestratorError::PhaseFailed { phase: "synthesize".into(), reason: e.to_string() })?;
        }
        std::fs::write(&path, &report)
            .map_err(|e| OrchestratorError::PhaseFailed { phase: "synthesize".into(), reason: e.to_string() })?;

        Ok(report)
    }

    /// Polls `last_token` and only publishes when a phase has gone `interval`
    /// or longer without producing a stream token — a phase that is
    /// actively streaming never triggers a heartbeat, no matter how long it
    /// runs in total.
    fn spawn_heartbeat(&self, batch_id: String, last_token: Arc<StdMutex<Instant>>) -> tokio::task::JoinHandle<()> {
        let bus = self.bus.clone();
        let interval = self.config.heartbeat;
        let poll_interval = (interval / 4).max(Duration::from_millis(50));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                let elapsed = last_token.lock().expect("last token lock poisoned").elapsed();
                if elapsed >= interval {
                    bus.publish(
                        batch_id.clone(),
                        EventPayload::WorkflowProgress {
                            message: "research session still running".to_string(),
                            detail: None,
                        },
                    );
                    info!(batch_id = %batch_id, "research heartbeat");
                    *last_token.lock().expect("last token lock poisoned") = Instant::now();
                }
            }
        })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
