//! Standalone demo driving one `WorkflowDriver::run` call end to end against
//! an in-process inference backend and an in-process worker stub - no real
//! LLM API key or network listener required.
//!
//! Run: cargo run --bin workflow_demo

use std::collections::HashMap;
use std::sync::Arc;

use agentverse::{
    AgentverseError, Config, InferenceBackend, LocalEngine, WorkerCallResult, WorkerCaller,
    WorkflowDriver,
};
use async_trait::async_trait;

/// Stands in for a real worker HTTP endpoint: every expert "completes" its
/// subtask by echoing a short acknowledgement. A production deployment
/// would point `Config::worker_urls` at real services speaking the §6 wire
/// contract instead.
struct DemoWorker;

#[async_trait]
impl WorkerCaller for DemoWorker {
    async fn call_worker(
        &self,
        _endpoint: &str,
        subtask: &str,
        role: &str,
        _contract: &str,
        _index: usize,
        _trace_carrier: &HashMap<String, String>,
    ) -> Result<WorkerCallResult, AgentverseError> {
        let preview: String = subtask.chars().take(60).collect();
        Ok(WorkerCallResult {
            output: format!("[{} done] {}", role, preview),
            llm_prompt: None,
            llm_response: None,
            llm_endpoint: None,
            backend_metadata: None,
            trace_metadata: None,
            request_id: "demo0001".to_string(),
        })
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config {
        llm_url: "in-process://local-engine".to_string(),
        worker_urls: vec!["in-process://demo-worker".to_string()],
        max_workers: 5,
        max_rounds: 3,
        max_vertical_iters: 3,
        llm_timeout: std::time::Duration::from_secs(120),
        worker_timeout: std::time::Duration::from_secs(120),
        default_system_prompt: "You are a helpful expert collaborating with other experts to accomplish a task.".to_string(),
        apply_chat_template: true,
    };

    let backend: Arc<dyn InferenceBackend> = Arc::new(LocalEngine::new(
        config.default_system_prompt.clone(),
        config.apply_chat_template,
    ));
    let transport: Arc<dyn WorkerCaller> = Arc::new(DemoWorker);

    let driver = WorkflowDriver::new(config, backend, transport);

    println!("=== agentverse workflow demo ===\n");
    let state = driver
        .run("Draft a one-paragraph release announcement.", 3, 70)
        .await;

    println!("task_id: {}", state.task_id);
    println!("iterations run: {}", state.iteration + 1);
    println!("completed: {}", state.completed);
    println!("llm_requests logged: {}", state.llm_requests.len());
    if let Some(evaluation) = &state.evaluation {
        println!("final score: {}", evaluation.score);
    }
    println!("\nfinal_output:\n{}", state.final_output.unwrap_or_default());
}
