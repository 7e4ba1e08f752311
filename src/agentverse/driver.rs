// src/agentverse/driver.rs

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use serde_json::json;
use uuid::Uuid;

use crate::agentverse::backend::InferenceBackend;
use crate::agentverse::config::Config;
use crate::agentverse::deliberator::Deliberator;
use crate::agentverse::events::ProgressChannel;
use crate::agentverse::evaluator::Evaluator;
use crate::agentverse::executor::Executor;
use crate::agentverse::llm_client::{GenerateMetadata, LlmClient};
use crate::agentverse::recruiter::{default_recruitment, Recruiter};
use crate::agentverse::synthesizer::Synthesizer;
use crate::agentverse::trace::TraceContext;
use crate::agentverse::transport::WorkerCaller;
use crate::agentverse::types::{
    Decision, DeliberationRound, IterationSummary, LlmRequestRecord, Role, WorkerCallLog, WorkflowState,
};

/// Owns the stage components and drives the Recruit -> Deliberate ->
/// Execute -> Evaluate loop for one or many workflow runs (§4.9).
///
/// Holds `Arc`s to the inference backend and worker transport so a single
/// driver can be shared across concurrently-running workflows - each
/// `run()` call owns its own [`WorkflowState`] (single-writer per
/// workflow, I5), but the underlying backend and transport are shared,
/// stateless collaborators.
pub struct WorkflowDriver {
    config: Config,
    llm: LlmClient,
    transport: Arc<dyn WorkerCaller>,
    progress: ProgressChannel,
}

impl WorkflowDriver {
    pub fn new(
        config: Config,
        backend: Arc<dyn InferenceBackend>,
        transport: Arc<dyn WorkerCaller>,
    ) -> Self {
        let llm = LlmClient::new(backend, config.llm_timeout);
        WorkflowDriver {
            config,
            llm,
            transport,
            progress: ProgressChannel::none(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressChannel) -> Self {
        self.progress = progress;
        self
    }

    /// Runs the full stage loop for one task, returning the frozen
    /// [`WorkflowState`] (§4.9, I1 and I4 hold at every exit path).
    pub async fn run(
        &self,
        task: impl Into<String>,
        max_iterations: u32,
        success_threshold: u8,
    ) -> WorkflowState {
        let task_id = Uuid::new_v4().to_string();
        let mut state = WorkflowState::new(task_id, task, max_iterations.max(1), success_threshold);
        let trace = TraceContext::new();

        let recruiter = Recruiter::new(&self.config, &self.llm);
        let deliberator = Deliberator::new(&self.config, &self.llm, self.transport.as_ref());
        let executor = Executor::new(self.transport.as_ref());
        let evaluator = Evaluator::new(&self.llm);
        let synthesizer = Synthesizer::new(&self.llm);

        let mut feedback: Option<String> = None;

        while state.iteration < state.max_iterations {
            self.progress.emit(
                "iteration_start",
                json!({"stage": "iteration", "iteration": state.iteration}),
            );

            // --- Stage 1: Recruit ---
            self.progress.emit(
                "stage_start",
                json!({"stage": "recruit", "iteration": state.iteration}),
            );
            let started_wall = Utc::now();
            let recruitment = match recruiter.recruit(&state.original_task, feedback.as_deref(), &trace).await {
                Ok((recruitment, prompt, response, meta)) => {
                    state.push_request(build_record(
                        state.iteration,
                        "recruit",
                        "recruit",
                        "orchestrator",
                        &prompt,
                        &response,
                        &self.config.llm_url,
                        started_wall,
                        &meta,
                        None,
                        None,
                    ));
                    recruitment
                }
                Err(err) if !err.is_recoverable() => {
                    // Fatal: no valid expert can be recruited and no
                    // fallback exists (§7: "Abort only when ... WORKER_URLS
                    // is empty at startup").
                    warn!("recruit aborted: {}", err);
                    state.final_output = Some(format!("workflow aborted: {}", err));
                    state.completed = true;
                    return state;
                }
                Err(err) => {
                    warn!("recruit degraded to default crew: {}", err);
                    default_recruitment(&self.config)
                }
            };
            self.progress.emit(
                "stage_complete",
                json!({"stage": "recruit", "iteration": state.iteration, "expert_count": recruitment.experts.len()}),
            );
            state.recruitment = Some(recruitment.clone());

            // --- Stage 2: Deliberate ---
            self.progress.emit(
                "stage_start",
                json!({"stage": "deliberate", "iteration": state.iteration}),
            );
            let decision = match deliberator
                .deliberate(&state.original_task, &recruitment.experts, recruitment.topology, &trace)
                .await
            {
                Ok(outcome) => {
                    self.log_deliberation_rounds(&mut state, &outcome.decision);
                    for call in &outcome.worker_calls {
                        state.push_request(build_worker_record(state.iteration, "deliberate", call));
                    }
                    if let Some((prompt, response)) = &outcome.synthesis {
                        state.push_request(build_synthesis_like_record(
                            state.iteration,
                            "deliberate",
                            "synthesize_discussion",
                            prompt,
                            response,
                            &self.config.llm_url,
                        ));
                    }
                    outcome.decision
                }
                Err(err) => {
                    warn!("deliberation synthesis failed, using fallback plan: {}", err);
                    Decision {
                        final_decision: format!(
                            "Deliberation synthesis failed ({}); proceeding with each expert's own judgment.",
                            err
                        ),
                        rounds: Vec::new(),
                        consensus_reached: false,
                        structure_used: recruitment.topology,
                        solver_role: None,
                        reviewer_roles: Vec::new(),
                    }
                }
            };
            self.progress.emit(
                "stage_complete",
                json!({"stage": "deliberate", "iteration": state.iteration, "consensus_reached": decision.consensus_reached}),
            );
            state.decision = Some(decision.clone());

            // --- Stage 3: Execute ---
            self.progress.emit(
                "stage_start",
                json!({"stage": "execute", "iteration": state.iteration}),
            );
            let (execution, calls) = executor
                .execute(&state.original_task, &recruitment.experts, &decision.final_decision, &trace)
                .await;
            for call in &calls {
                state.push_request(build_worker_record(state.iteration, "execute", call));
            }
            self.progress.emit(
                "execution_result",
                json!({
                    "stage": "execute",
                    "iteration": state.iteration,
                    "success_count": execution.success_count,
                    "failure_count": execution.failure_count,
                }),
            );
            state.execution = Some(execution.clone());

            // --- Stage 4: Evaluate ---
            self.progress.emit(
                "stage_start",
                json!({"stage": "evaluate", "iteration": state.iteration}),
            );
            let evaluation = match evaluator
                .evaluate(
                    &state.original_task,
                    &execution,
                    state.success_threshold,
                    state.iteration,
                    state.max_iterations,
                    &trace,
                )
                .await
            {
                Ok((evaluation, prompt, response, meta)) => {
                    state.push_request(build_record(
                        state.iteration,
                        "evaluate",
                        "evaluate",
                        "orchestrator",
                        &prompt,
                        &response,
                        &self.config.llm_url,
                        Utc::now(),
                        &meta,
                        None,
                        None,
                    ));
                    evaluation
                }
                Err(err) => {
                    warn!("evaluation failed, using degraded verdict: {}", err);
                    let should_iterate = state.iteration + 1 < state.max_iterations;
                    crate::agentverse::types::Evaluation {
                        goal_achieved: false,
                        score: 0,
                        criteria: None,
                        rationale: None,
                        feedback: format!("evaluation failed: {}", err),
                        missing_aspects: Vec::new(),
                        should_iterate,
                    }
                }
            };
            self.progress.emit(
                "stage_complete",
                json!({"stage": "evaluate", "iteration": state.iteration, "score": evaluation.score}),
            );
            state.evaluation = Some(evaluation.clone());

            state.iteration_history.push(IterationSummary {
                iteration: state.iteration,
                topology: decision.structure_used,
                score: evaluation.score,
                goal_achieved: evaluation.goal_achieved,
                should_iterate: evaluation.should_iterate,
            });
            self.progress.emit(
                "iteration_complete",
                json!({"iteration": state.iteration, "score": evaluation.score, "should_iterate": evaluation.should_iterate}),
            );

            if !evaluation.should_iterate {
                break;
            }
            feedback = Some(evaluation.feedback.clone());
            state.iteration += 1;
        }

        // --- Synthesize ---
        let final_output = match synthesizer.synthesize(&state, &trace).await {
            Ok((final_output, prompt, response, Some(meta))) => {
                state.push_request(build_record(
                    state.iteration,
                    "synthesize",
                    "synthesize",
                    "orchestrator",
                    &prompt,
                    &response,
                    &self.config.llm_url,
                    Utc::now(),
                    &meta,
                    None,
                    None,
                ));
                final_output
            }
            Ok((final_output, _, _, None)) => final_output,
            Err(err) => {
                warn!("synthesis failed, using degraded final output: {}", err);
                format!("Synthesis failed: {}", err)
            }
        };

        state.final_output = Some(final_output);
        state.completed = true;
        info!(
            "workflow {} completed after {} iteration(s)",
            state.task_id,
            state.iteration + 1
        );
        state
    }

    fn log_deliberation_rounds(&self, state: &mut WorkflowState, decision: &Decision) {
        for round in &decision.rounds {
            match round {
                DeliberationRound::Horizontal(round) => {
                    self.progress.emit(
                        "discussion_round",
                        json!({
                            "iteration": state.iteration,
                            "round": round.round_num,
                            "responses": round.responses.len(),
                        }),
                    );
                }
                DeliberationRound::Vertical(iteration) => {
                    self.progress.emit(
                        "vertical_iteration",
                        json!({
                            "iteration": state.iteration,
                            "solver_iteration": iteration.iteration,
                            "all_approved": iteration.all_approved,
                        }),
                    );
                }
            }
        }
    }
}

fn build_record(
    iteration: u32,
    stage: &str,
    label: &str,
    source: &str,
    prompt: &str,
    response: &str,
    endpoint: &str,
    start_time_utc: chrono::DateTime<Utc>,
    meta: &GenerateMetadata,
    agent_role: Option<Role>,
    round: Option<u32>,
) -> LlmRequestRecord {
    LlmRequestRecord {
        seq: 0,
        iteration,
        stage: stage.to_string(),
        label: label.to_string(),
        source: source.to_string(),
        prompt: prompt.to_string(),
        response: response.to_string(),
        endpoint: endpoint.to_string(),
        start_time_utc,
        request_id: meta.request_id.clone(),
        duration_seconds: meta.duration_seconds,
        agent_role,
        round,
        trace_metadata: Some(meta.trace_metadata.clone()),
        backend_metadata: Some(
            [
                ("prompt_tokens".to_string(), json!(meta.prompt_tokens)),
                ("completion_tokens".to_string(), json!(meta.completion_tokens)),
                ("queue_wait_seconds".to_string(), json!(meta.queue_wait_seconds)),
            ]
            .into_iter()
            .collect(),
        ),
    }
}

/// Variant of [`build_record`] for LLM-like calls that do not go through
/// [`LlmClient`] (the deliberator's discussion-synthesis call shares the
/// client, so this is currently identical; kept distinct so future
/// non-`LlmClient` synthesis paths don't have to retrofit the signature).
fn build_synthesis_like_record(
    iteration: u32,
    stage: &str,
    label: &str,
    prompt: &str,
    response: &str,
    endpoint: &str,
) -> LlmRequestRecord {
    LlmRequestRecord {
        seq: 0,
        iteration,
        stage: stage.to_string(),
        label: label.to_string(),
        source: "orchestrator".to_string(),
        prompt: prompt.to_string(),
        response: response.to_string(),
        endpoint: endpoint.to_string(),
        start_time_utc: Utc::now(),
        request_id: crate::agentverse::trace::new_request_id(),
        duration_seconds: 0.0,
        agent_role: None,
        round: None,
        trace_metadata: None,
        backend_metadata: None,
    }
}

fn build_worker_record(iteration: u32, stage: &str, call: &WorkerCallLog) -> LlmRequestRecord {
    LlmRequestRecord {
        seq: 0,
        iteration,
        stage: stage.to_string(),
        label: format!("{}-{}", stage, call.role.as_str()),
        source: format!("worker-{}", call.index),
        prompt: call.prompt.clone(),
        response: call.response.clone(),
        endpoint: call.endpoint.clone(),
        start_time_utc: Utc::now(),
        request_id: call.request_id.clone(),
        duration_seconds: call.duration_seconds,
        agent_role: Some(call.role),
        round: call.round,
        trace_metadata: None,
        backend_metadata: None,
    }
}
