//! Multi-agent orchestration runtime: Recruit -> Deliberate -> Execute -> Evaluate
//! over LLM-backed expert workers, fronted by a local async batching inference
//! backend.

pub mod agentverse;

pub use agentverse::backend::{InferenceBackend, LocalEngine};
pub use agentverse::config::Config;
pub use agentverse::deliberator::{Deliberator, DeliberationOutcome};
pub use agentverse::driver::WorkflowDriver;
pub use agentverse::error::AgentverseError;
pub use agentverse::evaluator::Evaluator;
pub use agentverse::events::{ProgressChannel, ProgressEvent};
pub use agentverse::executor::Executor;
pub use agentverse::llm_client::{GenerateMetadata, LlmClient};
pub use agentverse::recruiter::Recruiter;
pub use agentverse::synthesizer::Synthesizer;
pub use agentverse::transport::{WorkerCallResult, WorkerCaller, WorkerTransport};
pub use agentverse::types::{
    Decision, DeliberationRound, DiscussionRound, Evaluation, EvaluationCriteria, ExecutionOutput,
    ExecutionResult, Expert, ExpertResponse, IterationSummary, LlmRequestRecord, Recruitment,
    ReviewerResponse, Role, SolverIteration, Topology, WorkerCallLog, WorkflowState,
};
