//! Phase runners (C10): the five steps of a research session. Every phase
//! reads session state, composes a prompt, calls the streaming LLM client,
//! parses the result, writes it back to the session, and brackets its work
//! with `research_phase_change` events.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use research_common::event::EventPayload;
use research_common::types::Findings;
use research_events::EventBus;
use research_llm::{collect_json, collect_text, Message, StreamOptions, StreamingLlmClient};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::cancel::CancelToken;
use crate::content::ContentProvider;
use crate::error::OrchestratorError;
use crate::novelty::NoveltyFilter;
use crate::session::ResearchSession;

/// `user_guidance` is captured before Phase 0.5; `user_context` is
/// captured after Phase 1 and is empty for phases before Phase 2.
#[derive(Clone, Default)]
pub struct UserIntent {
    pub user_guidance: String,
    pub user_context: Option<String>,
}

impl UserIntent {
    fn render(&self) -> String {
        let mut block = format!("User guidance: {}\n", self.user_guidance);
        if let Some(context) = &self.user_context {
            block.push_str(&format!("User context: {context}\n"));
        }
        block
    }
}

pub struct PhaseContext {
    pub session: Arc<ResearchSession>,
    pub bus: EventBus,
    pub batch_id: String,
    pub llm: Arc<dyn StreamingLlmClient>,
    pub model: String,
    pub window_size_chars: usize,
    pub cancel: CancelToken,
    pub novelty: Arc<AsyncMutex<NoveltyFilter>>,
    /// When the most recent stream token was produced, shared with the
    /// orchestrator's heartbeat task so a heartbeat is only published
    /// after a phase has gone quiet for a while, not on a fixed clock.
    pub last_token: Arc<StdMutex<Instant>>,
}

impl PhaseContext {
    fn phase_change(&self, phase: &str, phase_name: &str, entering: bool) {
        self.bus.publish(
            self.batch_id.clone(),
            EventPayload::ResearchPhaseChange { phase: phase.into(), phase_name: phase_name.into(), entering },
        );
    }

    fn stream_structured(&self, phase: &str, object: serde_json::Value) {
        self.bus.publish(
            self.batch_id.clone(),
            EventPayload::ResearchStreamStructured { phase: phase.into(), object },
        );
    }

    fn stream_token(&self, phase: &str, fragment: String) {
        *self.last_token.lock().expect("last token lock poisoned") = Instant::now();
        self.bus.publish(self.batch_id.clone(), EventPayload::ResearchStreamToken { phase: phase.into(), fragment });
    }

    fn role(&self) -> String {
        self.session
            .get_metadata("role")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "a careful, skeptical generalist researcher".to_string())
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

// ---------------------------------------------------------------------
// Phase 0.5 — Role Generation
// ---------------------------------------------------------------------

pub async fn run_role_phase(ctx: &PhaseContext, data_overview: &str, pre_role_guidance: &str) {
    ctx.phase_change("0.5", "role_generation", true);

    let messages = vec![
        Message::system(
            "You are assigning a research persona for an analyst about to study a batch of \
             web content. Respond with one short sentence describing the role, plain text, no \
             preamble and no quotation marks.",
        ),
        Message::user(format!("Data overview:\n{data_overview}\n\nUser guidance:\n{pre_role_guidance}")),
    ];

    let stream = ctx.llm.stream(messages, StreamOptions::new(&ctx.model));
    let role = match collect_text(stream).await {
        Ok(collected) if !collected.text.trim().is_empty() => collected.text.trim().to_string(),
        Ok(_) => "a careful, skeptical generalist researcher".to_string(),
        Err(err) => {
            warn!(error = %err, "phase 0.5 role generation failed, using default role");
            "a careful, skeptical generalist researcher".to_string()
        }
    };

    ctx.session.set_metadata("role", serde_json::json!(role));
    ctx.phase_change("0.5", "role_generation", false);
}

// ---------------------------------------------------------------------
// Phase 1 — Discover
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub goal_text: String,
    pub rationale: String,
    pub feasibility: String,
}

#[derive(Debug, Deserialize)]
struct GoalsResponse {
    goals: Vec<Goal>,
}

fn parse_goal_selection(response: &str) -> (String, Option<String>) {
    match serde_json::from_str::<serde_json::Value>(response) {
        Ok(value) => {
            let goal_text = value.get("goal_text").and_then(|g| g.as_str()).unwrap_or(response).to_string();
            let amendment = value.get("amendment").and_then(|a| a.as_str()).map(str::to_string);
            (goal_text, amendment)
        }
        Err(_) => (response.to_string(), None),
    }
}

/// Runs Discover and suspends on a user prompt selecting one goal.
/// Returns the selected goal plus an optional amendment, persisted onto
/// the session as `selected_goal` / `phase_feedback_post_phase1`.
pub async fn run_discover_phase(
    ctx: &PhaseContext,
    intent: &UserIntent,
    data_overview: &str,
) -> Result<(Goal, Option<String>), OrchestratorError> {
    ctx.phase_change("1", "discover", true);

    let role = ctx.role();
    let messages = vec![
        Message::system(format!(
            "You are acting as: {role}. Propose between 5 and 10 candidate research goals for \
             this data. Respond as JSON: {{\"goals\": [{{\"goal_text\": ..., \"rationale\": ..., \
             \"feasibility\": ...}}]}}"
        )),
        Message::user(format!("{}\nData overview:\n{data_overview}", intent.render())),
    ];

    let stream = ctx.llm.stream(messages, StreamOptions::new(&ctx.model));
    let (value, _usage) = collect_json(stream)
        .await
        .map_err(|e| OrchestratorError::PhaseFailed { phase: "discover".into(), reason: e.to_string() })?;
    let parsed: GoalsResponse = serde_json::from_value(value.clone())
        .map_err(|e| OrchestratorError::PhaseFailed { phase: "discover".into(), reason: e.to_string() })?;
    ctx.stream_structured("1", value);

    if ctx.cancel.is_cancelled() {
        return Err(OrchestratorError::Cancelled);
    }

    let prompt_id = uuid::Uuid::new_v4().to_string();
    let choices: Vec<String> = parsed.goals.iter().map(|g| g.goal_text.clone()).collect();
    let rx = ctx.bus.await_user_response(&prompt_id);
    ctx.bus.publish(
        ctx.batch_id.clone(),
        EventPayload::UserInputRequired {
            prompt_id: prompt_id.clone(),
            prompt_text: "Select a research goal".to_string(),
            choices: Some(choices.clone()),
        },
    );

    let response = tokio::select! {
        res = rx => res.map_err(|_| OrchestratorError::Cancelled)?,
        _ = ctx.cancel.cancelled() => {
            ctx.bus.cancel_prompt(&prompt_id);
            return Err(OrchestratorError::Cancelled);
        }
    };

    let (selected_text, amendment) = parse_goal_selection(&response);
    let goal = parsed
        .goals
        .iter()
        .find(|g| g.goal_text == selected_text)
        .cloned()
        .or_else(|| parsed.goals.first().cloned())
        .ok_or_else(|| OrchestratorError::PhaseFailed {
            phase: "discover".into(),
            reason: "model returned no candidate goals".into(),
        })?;

    ctx.session.set_metadata("selected_goal", serde_json::to_value(&goal).expect("Goal serializes"));
    if let Some(text) = &amendment {
        ctx.session.set_metadata("phase_feedback_post_phase1", serde_json::json!(text));
    }

    ctx.phase_change("1", "discover", false);
    Ok((goal, amendment))
}

// ---------------------------------------------------------------------
// Phase 2 — Plan
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: u32,
    pub goal: String,
    pub required_data: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

pub async fn run_plan_phase(
    ctx: &PhaseContext,
    intent: &UserIntent,
    goal: &Goal,
    data_overview: &str,
) -> Result<Plan, OrchestratorError> {
    ctx.phase_change("2", "plan", true);

    let role = ctx.role();
    let messages = vec![
        Message::system(format!(
            "You are acting as: {role}. Produce an ordered plan of 3 to 7 steps to pursue the \
             given research goal. Respond as JSON: {{\"steps\": [{{\"step_id\": 1, \"goal\": ..., \
             \"required_data\": ..., \"notes\": null}}]}}. Choose whatever methodology fits; none \
             is prescribed."
        )),
        Message::user(format!(
            "{}\nSelected goal: {}\nRationale: {}\nData overview:\n{data_overview}",
            intent.render(),
            goal.goal_text,
            goal.rationale
        )),
    ];

    let stream = ctx.llm.stream(messages, StreamOptions::new(&ctx.model));
    let (value, _usage) = collect_json(stream)
        .await
        .map_err(|e| OrchestratorError::PhaseFailed { phase: "plan".into(), reason: e.to_string() })?;
    let plan: Plan = serde_json::from_value(value.clone())
        .map_err(|e| OrchestratorError::PhaseFailed { phase: "plan".into(), reason: e.to_string() })?;
    ctx.stream_structured("2", value);

    ctx.session.set_metadata("plan", serde_json::to_value(&plan).expect("Plan serializes"));
    ctx.phase_change("2", "plan", false);
    Ok(plan)
}

// ---------------------------------------------------------------------
// Phase 3 — Execute
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
struct StepOutput {
    summary: String,
    #[serde(default)]
    points_of_interest: Vec<String>,
    #[serde(default)]
    analysis_details: String,
    #[serde(default)]
    article: Option<String>,
    #[serde(default)]
    insights: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    sources: Vec<String>,
}

fn make_windows(content: &str, window_size: usize) -> Vec<String> {
    if window_size == 0 || content.chars().count() <= window_size {
        return vec![content.to_string()];
    }

    let mut windows = Vec::new();
    let mut current = String::new();
    for paragraph in content.split("\n\n") {
        if current.chars().count() + paragraph.chars().count() > window_size && !current.is_empty() {
            windows.push(std::mem::take(&mut current));
        }
        if paragraph.chars().count() > window_size {
            if !current.is_empty() {
                windows.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = paragraph.chars().collect();
            for chunk in chars.chunks(window_size) {
                windows.push(chunk.iter().collect());
            }
            continue;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        windows.push(current);
    }
    windows
}

/// Extends `existing` with normalized-unique entries from `incoming`,
/// tracking what's already present so the merge stays linear instead of
/// rebuilding the whole list per window.
fn merge_points_of_interest(existing: &mut Vec<String>, seen: &mut HashSet<String>, incoming: Vec<String>) {
    for point in incoming {
        let key = normalize(&point);
        if seen.insert(key) {
            existing.push(point);
        }
    }
}

fn final_dedup(points: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for point in points {
        if seen.insert(normalize(&point)) {
            out.push(point);
        }
    }
    out
}

async fn call_step_model(
    ctx: &PhaseContext,
    intent: &UserIntent,
    role: &str,
    step: &PlanStep,
    cumulative_summary: &str,
    content: &str,
) -> Result<StepOutput, OrchestratorError> {
    let messages = vec![
        Message::system(format!(
            "You are acting as: {role}. Analyze the provided content for this research step and \
             respond as JSON: {{\"summary\": ..., \"points_of_interest\": [...], \
             \"analysis_details\": ..., \"article\": null, \"insights\": ..., \"confidence\": 0.0, \
             \"sources\": [...]}}."
        )),
        Message::user(format!(
            "{}\nStep goal: {}\nRequired data: {}\nPrior cumulative summary:\n{cumulative_summary}\n\n\
             Content:\n{content}",
            intent.render(),
            step.goal,
            step.required_data
        )),
    ];

    let stream = ctx.llm.stream(messages, StreamOptions::new(&ctx.model));
    let (value, _usage) = collect_json(stream)
        .await
        .map_err(|e| OrchestratorError::PhaseFailed { phase: "execute".into(), reason: e.to_string() })?;
    serde_json::from_value(value)
        .map_err(|e| OrchestratorError::PhaseFailed { phase: "execute".into(), reason: e.to_string() })
}

async fn run_step(
    ctx: &PhaseContext,
    intent: &UserIntent,
    step: &PlanStep,
    content: &str,
) -> Result<(), OrchestratorError> {
    let role = ctx.role();
    let windows = make_windows(content, ctx.window_size_chars);
    let paged = windows.len() > 1;

    let mut points_of_interest = Vec::new();
    let mut seen = HashSet::new();
    let mut summary = String::new();
    let mut analysis_details = String::new();
    let mut article = None;
    let mut insights = String::new();
    let mut confidence: f64 = 0.0;
    let mut sources = Vec::new();

    for window in &windows {
        if ctx.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let cumulative_summary = ctx.session.get_cumulative_summary();
        let output = call_step_model(ctx, intent, &role, step, &cumulative_summary, window).await?;

        summary = output.summary;
        analysis_details = output.analysis_details;
        article = output.article.or(article);
        insights = output.insights;
        confidence = confidence.max(output.confidence);
        sources.extend(output.sources);
        merge_points_of_interest(&mut points_of_interest, &mut seen, output.points_of_interest);

        if paged {
            ctx.session.update_scratchpad(
                step.step_id,
                Findings {
                    summary: summary.clone(),
                    points_of_interest: final_dedup(points_of_interest.clone()),
                    analysis_details: analysis_details.clone(),
                    article: article.clone(),
                },
                insights.clone(),
                confidence,
                sources.clone(),
                false,
            )?;
        }
    }

    points_of_interest = final_dedup(points_of_interest);

    let prior_findings: Vec<(u32, usize, String)> = ctx
        .session
        .snapshot()
        .scratchpad
        .values()
        .flat_map(|entry| {
            let step_id = entry.step_id;
            entry
                .findings
                .points_of_interest
                .clone()
                .into_iter()
                .enumerate()
                .map(move |(index, text)| (step_id, index, text))
        })
        .collect();
    {
        let mut novelty = ctx.novelty.lock().await;
        points_of_interest = novelty.filter(step.step_id, &prior_findings, points_of_interest).await;
    }

    let findings = Findings { summary, points_of_interest, analysis_details, article };
    ctx.session.update_scratchpad(step.step_id, findings.clone(), insights, confidence, sources, true)?;
    ctx.stream_structured("3", serde_json::to_value(&findings).expect("Findings serializes"));
    Ok(())
}

pub async fn run_execute_phase(
    ctx: &PhaseContext,
    intent: &UserIntent,
    plan: &Plan,
    content: &dyn ContentProvider,
) -> Result<(), OrchestratorError> {
    ctx.phase_change("3", "execute", true);

    for step in &plan.steps {
        if ctx.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let data = content.gather(&step.required_data)?;
        if let Err(err) = run_step(ctx, intent, step, &data).await {
            warn!(step_id = step.step_id, error = %err, "execute step failed, recording and continuing");
            ctx.session.update_scratchpad(
                step.step_id,
                Findings {
                    summary: format!("step failed: {err}"),
                    points_of_interest: vec![],
                    analysis_details: String::new(),
                    article: None,
                },
                String::new(),
                0.0,
                vec![],
                true,
            )?;
        }
    }

    ctx.phase_change("3", "execute", false);
    Ok(())
}

// ---------------------------------------------------------------------
// Phase 4 — Synthesize
// ---------------------------------------------------------------------

pub async fn run_synthesize_phase(ctx: &PhaseContext, intent: &UserIntent) -> Result<String, OrchestratorError> {
    ctx.phase_change("4", "synthesize", true);

    let role = ctx.role();
    let cumulative_summary = ctx.session.get_cumulative_summary();
    let messages = vec![
        Message::system(format!(
            "You are acting as: {role}. Write the final research report as Markdown prose, one \
             document, no rigid outline stage. Reference evidence inline as [EVID-NN] and append \
             an evidence index listing each reference at the end."
        )),
        Message::user(format!("{}\nScratchpad:\n{cumulative_summary}", intent.render())),
    ];

    let stream = ctx.llm.stream(messages, StreamOptions::new(&ctx.model));
    let report = collect_text_streaming(ctx, "4", stream).await?;

    ctx.session.append_phase_artifact("synthesize", serde_json::json!({ "report": report }));
    ctx.phase_change("4", "synthesize", false);
    Ok(report)
}

async fn collect_text_streaming(
    ctx: &PhaseContext,
    phase: &str,
    mut stream: research_llm::ChunkStream,
) -> Result<String, OrchestratorError> {
    use futures::StreamExt;
    let mut text = String::new();
    while let Some(item) = stream.next().await {
        match item.map_err(|e| OrchestratorError::PhaseFailed { phase: phase.into(), reason: e.to_string() })? {
            research_llm::Chunk::Content(fragment) => {
                ctx.stream_token(phase, fragment.clone());
                text.push_str(&fragment);
            }
            research_llm::Chunk::Reasoning(_) | research_llm::Chunk::Usage(_) => {}
        }
    }
    Ok(text)
}
