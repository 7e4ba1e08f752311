// src/agentverse/types.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the five roles a recruited expert may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Planner,
    Researcher,
    Executor,
    Critic,
    Summarizer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Planner => "planner",
            Role::Researcher => "researcher",
            Role::Executor => "executor",
            Role::Critic => "critic",
            Role::Summarizer => "summarizer",
        }
    }

    /// Case-insensitive match, falling back to `executor` for unrecognized
    /// text - the recruiter must never fail to materialize an expert just
    /// because the model misspelled a role.
    pub fn parse_or_executor(raw: &str) -> Role {
        match raw.trim().to_ascii_lowercase().as_str() {
            "planner" => Role::Planner,
            "researcher" => Role::Researcher,
            "critic" => Role::Critic,
            "summarizer" => Role::Summarizer,
            _ => Role::Executor,
        }
    }
}

/// A recruited expert bound to a worker endpoint. Immutable once recruited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expert {
    pub role: Role,
    pub responsibilities: String,
    pub contract: String,
    pub endpoint: String,
    pub index: usize,
}

/// Adaptive communication topology chosen for one iteration's deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    Horizontal,
    Vertical,
}

impl Topology {
    /// Case-insensitive match against `{horizontal, vertical}`, defaulting
    /// to horizontal on any mismatch.
    pub fn parse_or_horizontal(raw: &str) -> Topology {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vertical" => Topology::Vertical,
            _ => Topology::Horizontal,
        }
    }
}

/// Stage 1 output: who was recruited, under which topology, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recruitment {
    pub experts: Vec<Expert>,
    pub topology: Topology,
    pub execution_order: Vec<String>,
    pub reasoning: String,
}

/// One expert's response within a horizontal discussion round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertResponse {
    pub role: Role,
    pub index: usize,
    pub response: String,
    pub consensus_flag: bool,
}

/// One round of horizontal (democratic) discussion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionRound {
    pub round_num: u32,
    pub responses: Vec<ExpertResponse>,
}

/// One reviewer's critique of a solver's proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerResponse {
    pub reviewer_role: Role,
    pub critique: String,
    pub approved: bool,
}

/// One iteration of vertical (solver/reviewer) deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverIteration {
    pub iteration: u32,
    pub proposal: String,
    pub reviewer_responses: Vec<ReviewerResponse>,
    pub all_approved: bool,
}

/// Either shape of deliberation round, tagged so `Decision.rounds` can hold
/// a mixed-but-actually-uniform sequence depending on `structure_used`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeliberationRound {
    Horizontal(DiscussionRound),
    Vertical(SolverIteration),
}

/// Stage 2 output: the agreed plan plus the transcript that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub final_decision: String,
    pub rounds: Vec<DeliberationRound>,
    pub consensus_reached: bool,
    pub structure_used: Topology,
    pub solver_role: Option<Role>,
    pub reviewer_roles: Vec<Role>,
}

/// One underlying worker RPC, ready for the driver to fold into an
/// `LlmRequestRecord` with `source = "worker-<index>"` (§3 LLMRequestRecord,
/// §5 "llm_requests records are appended in completion order").
#[derive(Debug, Clone)]
pub struct WorkerCallLog {
    pub role: Role,
    pub index: usize,
    pub endpoint: String,
    pub prompt: String,
    pub response: String,
    pub request_id: String,
    pub duration_seconds: f64,
    pub round: Option<u32>,
}

/// One expert's execution output for stage 3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub role: Role,
    pub index: usize,
    pub subtask: String,
    pub output: String,
    pub success: bool,
}

/// Stage 3 aggregate result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub outputs: Vec<ExecutionOutput>,
    pub success_count: usize,
    pub failure_count: usize,
}

/// Optional multi-criterion breakdown attached to an [`Evaluation`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationCriteria {
    pub completeness: u8,
    pub correctness: u8,
    pub clarity: u8,
    pub relevance: u8,
    pub actionability: u8,
}

/// Stage 4 output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub goal_achieved: bool,
    pub score: u8,
    pub criteria: Option<EvaluationCriteria>,
    pub rationale: Option<String>,
    pub feedback: String,
    pub missing_aspects: Vec<String>,
    pub should_iterate: bool,
}

/// One entry in the append-only, dense-`seq` request log (I2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequestRecord {
    pub seq: u64,
    pub iteration: u32,
    pub stage: String,
    pub label: String,
    pub source: String,
    pub prompt: String,
    pub response: String,
    pub endpoint: String,
    pub start_time_utc: DateTime<Utc>,
    pub request_id: String,
    pub duration_seconds: f64,
    pub agent_role: Option<Role>,
    pub round: Option<u32>,
    pub trace_metadata: Option<HashMap<String, String>>,
    pub backend_metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Per-iteration summary appended to `WorkflowState.iteration_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: u32,
    pub topology: Topology,
    pub score: u8,
    pub goal_achieved: bool,
    pub should_iterate: bool,
}

/// The orchestrator's single mutable record for one workflow run.
///
/// Owned and mutated only by the [`crate::agentverse::driver::WorkflowDriver`]
/// (single-writer invariant, I5); fan-out tasks return values rather than
/// writing into this struct directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub task_id: String,
    pub original_task: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub success_threshold: u8,
    pub recruitment: Option<Recruitment>,
    pub decision: Option<Decision>,
    pub execution: Option<ExecutionResult>,
    pub evaluation: Option<Evaluation>,
    pub iteration_history: Vec<IterationSummary>,
    pub llm_requests: Vec<LlmRequestRecord>,
    pub final_output: Option<String>,
    pub completed: bool,
}

impl WorkflowState {
    pub fn new(task_id: impl Into<String>, task: impl Into<String>, max_iterations: u32, success_threshold: u8) -> Self {
        WorkflowState {
            task_id: task_id.into(),
            original_task: task.into(),
            iteration: 0,
            max_iterations,
            success_threshold: success_threshold.min(100),
            recruitment: None,
            decision: None,
            execution: None,
            evaluation: None,
            iteration_history: Vec::new(),
            llm_requests: Vec::new(),
            final_output: None,
            completed: false,
        }
    }

    /// Appends a request record, assigning the next dense `seq` (I2).
    pub fn push_request(&mut self, mut record: LlmRequestRecord) {
        record.seq = self.llm_requests.len() as u64 + 1;
        self.llm_requests.push(record);
    }
}
