// src/agentverse/deliberator.rs

use std::time::Instant;

use log::info;

use crate::agentverse::config::Config;
use crate::agentverse::error::AgentverseError;
use crate::agentverse::llm_client::LlmClient;
use crate::agentverse::trace::TraceContext;
use crate::agentverse::transport::WorkerCaller;
use crate::agentverse::types::{
    Decision, DeliberationRound, DiscussionRound, Expert, ExpertResponse, ReviewerResponse, Role,
    SolverIteration, Topology, WorkerCallLog,
};

const CONSENSUS_SENTINEL: &str = "[CONSENSUS]";
const APPROVED_SENTINEL: &str = "[APPROVED]";
const SYNTHESIS_MAX_TOKENS: u32 = 2048;

/// Stage 2 output: the `Decision` plus everything the driver needs to fold
/// into the dense `llm_requests` log (I2) - one [`WorkerCallLog`] per
/// underlying worker RPC, and the horizontal synthesis call's prompt/
/// response (vertical deliberation has no separate synthesis call: its
/// `final_decision` is the last approved proposal).
pub struct DeliberationOutcome {
    pub decision: Decision,
    pub worker_calls: Vec<WorkerCallLog>,
    pub synthesis: Option<(String, String)>,
}

/// Stage 2: runs horizontal or vertical deliberation to a `Decision`.
pub struct Deliberator<'a> {
    config: &'a Config,
    llm: &'a LlmClient,
    transport: &'a dyn WorkerCaller,
}

impl<'a> Deliberator<'a> {
    pub fn new(config: &'a Config, llm: &'a LlmClient, transport: &'a dyn WorkerCaller) -> Self {
        Deliberator {
            config,
            llm,
            transport,
        }
    }

    /// Runs whichever protocol `topology` selects (decided by the Recruiter
    /// in the preceding stage).
    pub async fn deliberate(
        &self,
        task: &str,
        experts: &[Expert],
        topology: Topology,
        trace: &TraceContext,
    ) -> Result<DeliberationOutcome, AgentverseError> {
        match topology {
            Topology::Horizontal => self.horizontal(task, experts, trace).await,
            Topology::Vertical => self.vertical(task, experts, trace).await,
        }
    }

    async fn horizontal(
        &self,
        task: &str,
        experts: &[Expert],
        trace: &TraceContext,
    ) -> Result<DeliberationOutcome, AgentverseError> {
        let mut history = String::new();
        let mut rounds: Vec<DeliberationRound> = Vec::new();
        let mut consensus_reached = false;
        let mut worker_calls: Vec<WorkerCallLog> = Vec::new();

        for round_num in 1..=self.config.max_rounds {
            let mut responses = Vec::with_capacity(experts.len());

            for expert in experts {
                let prompt = format!(
                    "Task: {}\n\nDiscussion so far:\n{}\n\nAs the {} expert, share your view. \
                     If you agree with the group's direction and believe no further discussion is \
                     needed, include the exact text {} in your response.",
                    task, history, expert.role.as_str(), CONSENSUS_SENTINEL
                );

                let carrier = trace.carrier();
                let started = Instant::now();
                let response = match self
                    .transport
                    .call_worker(
                        &expert.endpoint,
                        &prompt,
                        expert.role.as_str(),
                        &expert.contract,
                        expert.index,
                        &carrier,
                    )
                    .await
                {
                    Ok(result) => {
                        worker_calls.push(WorkerCallLog {
                            role: expert.role,
                            index: expert.index,
                            endpoint: expert.endpoint.clone(),
                            prompt: prompt.clone(),
                            response: result.output.clone(),
                            request_id: result.request_id,
                            duration_seconds: started.elapsed().as_secs_f64(),
                            round: Some(round_num),
                        });
                        result.output
                    }
                    Err(err) => format!("[Agent error: {}]", err),
                };

                let consensus_flag = response.contains(CONSENSUS_SENTINEL);
                responses.push(ExpertResponse {
                    role: expert.role,
                    index: expert.index,
                    response,
                    consensus_flag,
                });
            }

            let round_consensus = !responses.is_empty() && responses.iter().all(|r| r.consensus_flag);

            history.push_str(&format!("--- Round {} ---\n", round_num));
            for response in &responses {
                history.push_str(&format!("[{}]: {}\n", response.role.as_str(), response.response));
            }

            rounds.push(DeliberationRound::Horizontal(DiscussionRound {
                round_num,
                responses,
            }));

            if round_consensus {
                consensus_reached = true;
                info!("horizontal deliberation reached consensus at round {}", round_num);
                break;
            }
        }

        let synthesis_prompt = format!(
            "Task: {}\n\nFull discussion transcript:\n{}\n\nSynthesize the discussion above into a \
             single, actionable plan. Be concrete and self-contained.",
            task, history
        );
        let (final_decision, _meta) = self.llm_synthesize(&synthesis_prompt, trace).await?;

        let decision = Decision {
            final_decision: final_decision.clone(),
            rounds,
            consensus_reached,
            structure_used: Topology::Horizontal,
            solver_role: None,
            reviewer_roles: Vec::new(),
        };

        Ok(DeliberationOutcome {
            decision,
            worker_calls,
            synthesis: Some((synthesis_prompt, final_decision)),
        })
    }

    async fn vertical(
        &self,
        task: &str,
        experts: &[Expert],
        trace: &TraceContext,
    ) -> Result<DeliberationOutcome, AgentverseError> {
        let solver_pos = experts
            .iter()
            .position(|e| e.role == Role::Planner)
            .unwrap_or(0);
        let solver = &experts[solver_pos];
        let reviewers: Vec<&Expert> = experts
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != solver_pos)
            .map(|(_, e)| e)
            .collect();

        let mut proposal = String::new();
        let mut accumulated_critiques = String::new();
        let mut rounds: Vec<DeliberationRound> = Vec::new();
        let mut consensus_reached = false;
        let mut worker_calls: Vec<WorkerCallLog> = Vec::new();

        for iteration in 1..=self.config.max_vertical_iters {
            let solver_prompt = build_solver_prompt(task, &proposal, &accumulated_critiques);
            let carrier = trace.carrier();
            let started = Instant::now();
            proposal = match self
                .transport
                .call_worker(
                    &solver.endpoint,
                    &solver_prompt,
                    solver.role.as_str(),
                    &solver.contract,
                    solver.index,
                    &carrier,
                )
                .await
            {
                Ok(result) => {
                    worker_calls.push(WorkerCallLog {
                        role: solver.role,
                        index: solver.index,
                        endpoint: solver.endpoint.clone(),
                        prompt: solver_prompt,
                        response: result.output.clone(),
                        request_id: result.request_id,
                        duration_seconds: started.elapsed().as_secs_f64(),
                        round: Some(iteration),
                    });
                    result.output
                }
                Err(err) => format!("[Agent error: {}]", err),
            };

            if reviewers.is_empty() {
                rounds.push(DeliberationRound::Vertical(SolverIteration {
                    iteration,
                    proposal: proposal.clone(),
                    reviewer_responses: Vec::new(),
                    all_approved: true,
                }));
                consensus_reached = true;
                break;
            }

            // Reviewers run fully in parallel (joined before the iteration
            // advances), per §4.6.2 / §5. Borrowing `self.transport` across
            // the futures is enough for concurrency here - no `tokio::spawn`
            // is needed since nothing needs to outlive this function call.
            let review_futures = reviewers.iter().map(|reviewer| {
                let critique_prompt = build_reviewer_prompt(task, &proposal);
                let carrier = trace.carrier();
                async move {
                    let started = Instant::now();
                    match self
                        .transport
                        .call_worker(
                            &reviewer.endpoint,
                            &critique_prompt,
                            reviewer.role.as_str(),
                            &reviewer.contract,
                            reviewer.index,
                            &carrier,
                        )
                        .await
                    {
                        Ok(result) => (
                            (*reviewer).clone(),
                            result.output.clone(),
                            Some(WorkerCallLog {
                                role: reviewer.role,
                                index: reviewer.index,
                                endpoint: reviewer.endpoint.clone(),
                                prompt: critique_prompt,
                                response: result.output,
                                request_id: result.request_id,
                                duration_seconds: started.elapsed().as_secs_f64(),
                                round: Some(iteration),
                            }),
                        ),
                        Err(err) => ((*reviewer).clone(), format!("[Agent error: {}]", err), None),
                    }
                }
            });
            let results: Vec<(Expert, String, Option<WorkerCallLog>)> =
                futures_util::future::join_all(review_futures).await;

            let mut reviewer_responses = Vec::with_capacity(results.len());
            let mut critiques_for_next_round = String::new();
            for (reviewer, critique, call_log) in results {
                if let Some(call_log) = call_log {
                    worker_calls.push(call_log);
                }
                let approved = critique.contains(APPROVED_SENTINEL);
                critiques_for_next_round.push_str(&format!("[{}]: {}\n", reviewer.role.as_str(), critique));
                reviewer_responses.push(ReviewerResponse {
                    reviewer_role: reviewer.role,
                    critique,
                    approved,
                });
            }

            let all_approved = reviewer_responses.iter().all(|r| r.approved);
            rounds.push(DeliberationRound::Vertical(SolverIteration {
                iteration,
                proposal: proposal.clone(),
                reviewer_responses,
                all_approved,
            }));

            if all_approved {
                consensus_reached = true;
                info!("vertical deliberation approved at iteration {}", iteration);
                break;
            }
            accumulated_critiques = critiques_for_next_round;
        }

        let decision = Decision {
            final_decision: proposal,
            rounds,
            consensus_reached,
            structure_used: Topology::Vertical,
            solver_role: Some(solver.role),
            reviewer_roles: reviewers.iter().map(|e| e.role).collect(),
        };

        Ok(DeliberationOutcome {
            decision,
            worker_calls,
            synthesis: None,
        })
    }

    async fn llm_synthesize(
        &self,
        prompt: &str,
        trace: &TraceContext,
    ) -> Result<(String, crate::agentverse::llm_client::GenerateMetadata), AgentverseError> {
        let carrier = trace.carrier();
        self.llm
            .generate_with_max_tokens(prompt, Some(SYNTHESIS_MAX_TOKENS), &carrier)
            .await
    }
}

fn build_solver_prompt(task: &str, previous_proposal: &str, accumulated_critiques: &str) -> String {
    if previous_proposal.is_empty() {
        format!("Task: {}\n\nPropose an initial solution.", task)
    } else {
        format!(
            "Task: {}\n\nYour previous proposal:\n{}\n\nReviewer critiques:\n{}\n\nRevise your proposal \
             to address the critiques above.",
            task, previous_proposal, accumulated_critiques
        )
    }
}

fn build_reviewer_prompt(task: &str, proposal: &str) -> String {
    format!(
        "Task: {}\n\nProposal to review:\n{}\n\nCritique this proposal. If it fully satisfies the task, \
         include the exact text {} in your response.",
        task, proposal, APPROVED_SENTINEL
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentverse::backend::LocalEngine;
    use crate::agentverse::error::AgentverseError;
    use crate::agentverse::transport::WorkerCallResult;
    use crate::agentverse::types::Role;
    use std::collections::HashMap;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct ScriptedTransport {
        responses: HashMap<String, Vec<String>>,
    }

    #[async_trait]
    impl WorkerCaller for ScriptedTransport {
        async fn call_worker(
            &self,
            endpoint: &str,
            _subtask: &str,
            role: &str,
            _contract: &str,
            _index: usize,
            _trace_carrier: &HashMap<String, String>,
        ) -> Result<WorkerCallResult, AgentverseError> {
            let key = format!("{}:{}", endpoint, role);
            let output = self
                .responses
                .get(&key)
                .cloned()
                .unwrap_or_default()
                .first()
                .cloned()
                .unwrap_or_else(|| "no response".to_string());
            Ok(WorkerCallResult {
                output,
                llm_prompt: None,
                llm_response: None,
                llm_endpoint: None,
                backend_metadata: None,
                trace_metadata: None,
                request_id: "abcd1234".to_string(),
            })
        }
    }

    fn config() -> Config {
        Config {
            llm_url: "http://llm".into(),
            worker_urls: vec!["http://w1".into()],
            max_workers: 5,
            max_rounds: 3,
            max_vertical_iters: 3,
            llm_timeout: Duration::from_secs(5),
            worker_timeout: Duration::from_secs(5),
            default_system_prompt: "sys".into(),
            apply_chat_template: false,
        }
    }

    fn llm() -> LlmClient {
        let engine = LocalEngine::new("sys", false)
            .with_generator(Box::new(|_: &str| "synthesized plan".to_string()));
        LlmClient::new(Arc::new(engine), Duration::from_secs(5))
    }

    fn expert(role: Role, idx: usize, endpoint: &str) -> Expert {
        Expert {
            role,
            responsibilities: "do stuff".into(),
            contract: "contract".into(),
            endpoint: endpoint.to_string(),
            index: idx,
        }
    }

    #[tokio::test]
    async fn horizontal_stops_at_immediate_consensus() {
        let mut responses = HashMap::new();
        responses.insert(
            "http://w1:executor".to_string(),
            vec!["agreed [CONSENSUS]".to_string()],
        );
        let transport = ScriptedTransport { responses };
        let cfg = config();
        let llm = llm();
        let deliberator = Deliberator::new(&cfg, &llm, &transport);
        let experts = vec![expert(Role::Executor, 0, "http://w1")];
        let outcome = deliberator
            .deliberate("task", &experts, Topology::Horizontal, &TraceContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.decision.rounds.len(), 1);
        assert!(outcome.decision.consensus_reached);
        assert!(outcome.synthesis.is_some());
    }

    #[tokio::test]
    async fn horizontal_runs_all_rounds_without_consensus() {
        let mut responses = HashMap::new();
        responses.insert(
            "http://w1:executor".to_string(),
            vec!["still discussing".to_string()],
        );
        let transport = ScriptedTransport { responses };
        let mut cfg = config();
        cfg.max_rounds = 3;
        let llm = llm();
        let deliberator = Deliberator::new(&cfg, &llm, &transport);
        let experts = vec![expert(Role::Executor, 0, "http://w1")];
        let outcome = deliberator
            .deliberate("task", &experts, Topology::Horizontal, &TraceContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.decision.rounds.len(), 3);
        assert!(!outcome.decision.consensus_reached);
    }

    #[tokio::test]
    async fn vertical_short_circuits_when_all_reviewers_approve() {
        let mut responses = HashMap::new();
        responses.insert("http://w1:planner".to_string(), vec!["my proposal".to_string()]);
        responses.insert(
            "http://w1:critic".to_string(),
            vec!["looks good [APPROVED]".to_string()],
        );
        let transport = ScriptedTransport { responses };
        let cfg = config();
        let llm = llm();
        let deliberator = Deliberator::new(&cfg, &llm, &transport);
        let experts = vec![
            expert(Role::Planner, 0, "http://w1"),
            expert(Role::Critic, 1, "http://w1"),
        ];
        let outcome = deliberator
            .deliberate("task", &experts, Topology::Vertical, &TraceContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.decision.rounds.len(), 1);
        assert!(outcome.decision.consensus_reached);
        assert_eq!(outcome.decision.final_decision, "my proposal");
        assert!(outcome.synthesis.is_none());
    }

    #[tokio::test]
    async fn vertical_with_no_reviewers_auto_approves_first_proposal() {
        let mut responses = HashMap::new();
        responses.insert("http://w1:planner".to_string(), vec!["solo plan".to_string()]);
        let transport = ScriptedTransport { responses };
        let cfg = config();
        let llm = llm();
        let deliberator = Deliberator::new(&cfg, &llm, &transport);
        let experts = vec![expert(Role::Planner, 0, "http://w1")];
        let outcome = deliberator
            .deliberate("task", &experts, Topology::Vertical, &TraceContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.decision.rounds.len(), 1);
        assert!(outcome.decision.consensus_reached);
    }

    #[tokio::test]
    async fn worker_error_becomes_sentinel_and_is_not_consensus() {
        struct AlwaysFails;
        #[async_trait]
        impl WorkerCaller for AlwaysFails {
            async fn call_worker(
                &self,
                _endpoint: &str,
                _subtask: &str,
                _role: &str,
                _contract: &str,
                _index: usize,
                _trace_carrier: &HashMap<String, String>,
            ) -> Result<WorkerCallResult, AgentverseError> {
                Err(AgentverseError::ConnectFailed("down".to_string()))
            }
        }
        let transport = AlwaysFails;
        let mut cfg = config();
        cfg.max_rounds = 1;
        let llm = llm();
        let deliberator = Deliberator::new(&cfg, &llm, &transport);
        let experts = vec![expert(Role::Executor, 0, "http://w1")];
        let outcome = deliberator
            .deliberate("task", &experts, Topology::Horizontal, &TraceContext::new())
            .await
            .unwrap();
        assert!(!outcome.decision.consensus_reached);
        assert!(outcome.worker_calls.is_empty());
    }
}
