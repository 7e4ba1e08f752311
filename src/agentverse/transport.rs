// src/agentverse/transport.rs

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agentverse::error::AgentverseError;
use crate::agentverse::trace::{new_request_id, with_request_id};

lazy_static! {
    /// Shared HTTP client with persistent connection pooling, reused by
    /// every `WorkerTransport` so concurrent worker calls keep TLS sessions
    /// and DNS lookups warm instead of rebuilding a pool per instance.
    static ref SHARED_HTTP_CLIENT: Client = Client::builder()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .build()
        .expect("reqwest client configuration is always valid here");
}

#[derive(Debug, Clone, Serialize)]
struct WorkerRequestBody<'a> {
    subtask: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_b_role: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_b_contract: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct WorkerResponseBody {
    #[allow(dead_code)]
    task_id: Option<String>,
    #[allow(dead_code)]
    agent_id: Option<String>,
    output: String,
    llm_prompt: Option<String>,
    llm_response: Option<String>,
    llm_endpoint: Option<String>,
    llm_meta: Option<Value>,
    otel: Option<Value>,
}

/// Successful result of one worker RPC (§4.1).
#[derive(Debug, Clone)]
pub struct WorkerCallResult {
    pub output: String,
    pub llm_prompt: Option<String>,
    pub llm_response: Option<String>,
    pub llm_endpoint: Option<String>,
    pub backend_metadata: Option<Value>,
    pub trace_metadata: Option<Value>,
    pub request_id: String,
}

/// Issues one RPC to a named worker endpoint with a role/contract.
///
/// Implemented by [`WorkerTransport`] for real HTTP calls; tests substitute
/// an in-memory fake, the same way the teacher's orchestration layer tests
/// against a stand-in `ClientWrapper` rather than a live API.
#[async_trait]
pub trait WorkerCaller: Send + Sync {
    async fn call_worker(
        &self,
        endpoint: &str,
        subtask: &str,
        role: &str,
        contract: &str,
        index: usize,
        trace_carrier: &HashMap<String, String>,
    ) -> Result<WorkerCallResult, AgentverseError>;
}

/// Pure transport: does not retry and does not know about `WorkflowState`.
/// Failures are classified into the shared [`AgentverseError`] taxonomy so
/// callers (the Executor, the Deliberator) can decide per §7 whether the
/// stage continues.
pub struct WorkerTransport {
    client: Client,
    timeout: Duration,
}

impl WorkerTransport {
    /// Clones the shared pooled client; `timeout` is applied per-request
    /// rather than baked into the client itself (§4.1: each worker can have
    /// a different effective deadline depending on `WORKER_TIMEOUT`).
    pub fn new(timeout: Duration) -> Self {
        WorkerTransport {
            client: SHARED_HTTP_CLIENT.clone(),
            timeout,
        }
    }
}

#[async_trait]
impl WorkerCaller for WorkerTransport {
    /// Issues one worker call. `index` becomes the `X-Agent-Index` header so
    /// a worker can log which concurrent fan-out slot it occupied.
    async fn call_worker(
        &self,
        endpoint: &str,
        subtask: &str,
        role: &str,
        contract: &str,
        index: usize,
        trace_carrier: &HashMap<String, String>,
    ) -> Result<WorkerCallResult, AgentverseError> {
        if endpoint.trim().is_empty() {
            return Err(AgentverseError::ConfigError(
                "worker endpoint must not be empty".to_string(),
            ));
        }

        let request_id = new_request_id();
        let carrier = with_request_id(trace_carrier.clone(), &request_id);

        let body = WorkerRequestBody {
            subtask,
            scenario: None,
            agent_b_role: Some(role),
            agent_b_contract: Some(contract),
        };

        debug!(
            "call_worker endpoint={} role={} request_id={}",
            endpoint, role, request_id
        );

        let mut request = self.client.post(endpoint).json(&body).timeout(self.timeout);
        for (key, value) in carrier.iter() {
            request = request.header(key.as_str(), value.as_str());
        }
        request = request.header("X-Agent-Index", index.to_string());

        let response = request.send().await.map_err(|err| {
            let classified = classify_reqwest_error(&err, self.timeout);
            warn!("call_worker failed endpoint={} err={}", endpoint, classified);
            classified
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let body_prefix = body_text.chars().take(200).collect::<String>();
            warn!(
                "call_worker remote error endpoint={} status={}",
                endpoint,
                status.as_u16()
            );
            return Err(AgentverseError::RemoteError {
                status: status.as_u16(),
                body_prefix,
            });
        }

        let parsed: WorkerResponseBody = response
            .json()
            .await
            .map_err(|err| AgentverseError::RemoteError {
                status: status.as_u16(),
                body_prefix: format!("invalid worker response body: {}", err),
            })?;

        Ok(WorkerCallResult {
            output: parsed.output,
            llm_prompt: parsed.llm_prompt,
            llm_response: parsed.llm_response,
            llm_endpoint: parsed.llm_endpoint,
            backend_metadata: parsed.llm_meta,
            trace_metadata: parsed.otel,
            request_id,
        })
    }
}

/// Classifies a `reqwest::Error` into the shared failure taxonomy (§4.1).
pub(crate) fn classify_reqwest_error(err: &reqwest::Error, timeout: Duration) -> AgentverseError {
    if err.is_timeout() {
        AgentverseError::Timeout(format!("exceeded {:?}", timeout))
    } else if err.is_connect() {
        AgentverseError::ConnectFailed(err.to_string())
    } else {
        AgentverseError::ConnectFailed(err.to_string())
    }
}
