//! Black-box integration tests driving `WorkflowDriver` through the public
//! API only, the way the teacher's `tests/` suite exercises `Agent` and
//! `ClientWrapper` rather than reaching into crate internals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agentverse::{Config, InferenceBackend, LocalEngine, WorkerCallResult, WorkerCaller, WorkflowDriver};
use async_trait::async_trait;

struct EchoWorker;

#[async_trait]
impl WorkerCaller for EchoWorker {
    async fn call_worker(
        &self,
        _endpoint: &str,
        subtask: &str,
        _role: &str,
        _contract: &str,
        _index: usize,
        _trace_carrier: &HashMap<String, String>,
    ) -> Result<WorkerCallResult, agentverse::AgentverseError> {
        Ok(WorkerCallResult {
            output: format!("worked on: {}", &subtask[..subtask.len().min(30)]),
            llm_prompt: None,
            llm_response: None,
            llm_endpoint: None,
            backend_metadata: None,
            trace_metadata: None,
            request_id: "itest001".to_string(),
        })
    }
}

fn config(worker_urls: Vec<&str>) -> Config {
    Config {
        llm_url: "http://llm.internal".into(),
        worker_urls: worker_urls.into_iter().map(str::to_string).collect(),
        max_workers: 5,
        max_rounds: 2,
        max_vertical_iters: 2,
        llm_timeout: Duration::from_secs(5),
        worker_timeout: Duration::from_secs(5),
        default_system_prompt: "You collaborate with other experts.".into(),
        apply_chat_template: false,
    }
}

fn driver_with_response(cfg: Config, response: &'static str) -> WorkflowDriver {
    let backend: Arc<dyn InferenceBackend> = Arc::new(
        LocalEngine::new("sys", false).with_generator(Box::new(move |_: &str| response.to_string())),
    );
    let transport: Arc<dyn WorkerCaller> = Arc::new(EchoWorker);
    WorkflowDriver::new(cfg, backend, transport)
}

#[tokio::test]
async fn full_workflow_completes_and_produces_a_final_output() {
    let response = r#"{"experts": [{"role": "executor"}], "score": 95, "goal_achieved": true, "should_iterate": false}"#;
    let driver = driver_with_response(config(vec!["http://worker-a"]), response);

    let state = driver.run("summarize the quarterly report", 3, 70).await;

    assert!(state.completed);
    assert!(state.final_output.is_some());
    assert_eq!(state.iteration_history.len(), 1);
    let evaluation = state.evaluation.expect("evaluation should be recorded");
    assert!(evaluation.goal_achieved);
    assert_eq!(evaluation.score, 95);
}

#[tokio::test]
async fn workflow_aborts_cleanly_when_no_workers_are_configured() {
    let driver = driver_with_response(config(vec![]), r#"{"score": 50}"#);
    let state = driver.run("anything", 3, 70).await;

    assert!(state.completed);
    assert!(state.recruitment.is_none());
    assert!(state.final_output.unwrap().contains("aborted"));
}

#[tokio::test]
async fn llm_request_log_is_dense_and_starts_at_one() {
    let driver = driver_with_response(config(vec!["http://worker-a", "http://worker-b"]), r#"{"score": 88}"#);
    let state = driver.run("plan a launch", 1, 70).await;

    assert!(!state.llm_requests.is_empty());
    for (position, record) in state.llm_requests.iter().enumerate() {
        assert_eq!(record.seq, position as u64 + 1);
    }
}
