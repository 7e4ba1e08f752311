// src/agentverse/llm_client.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::agentverse::backend::InferenceBackend;
use crate::agentverse::error::AgentverseError;
use crate::agentverse::trace::new_request_id;

/// Everything C9/C5/C8/C10 need to turn one generation call into an
/// `LlmRequestRecord`.
#[derive(Debug, Clone)]
pub struct GenerateMetadata {
    pub request_id: String,
    pub duration_seconds: f64,
    pub queue_wait_seconds: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub trace_metadata: HashMap<String, String>,
}

/// Issues one generation request to the inference backend and injects
/// trace context.
///
/// Per §2's control-flow note ("C5, C8, C10 call C3 directly via C2"), this
/// client calls the backend in-process rather than over HTTP - this crate
/// does not implement the listener that would front it (out of scope per
/// §1's "CLI wrappers, HTTP listeners"). A deployment that fronts the
/// backend with an HTTP server can still speak the wire contract in §6;
/// that server is external to this crate.
pub struct LlmClient {
    backend: Arc<dyn InferenceBackend>,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(backend: Arc<dyn InferenceBackend>, timeout: Duration) -> Self {
        LlmClient { backend, timeout }
    }

    /// Generates text for `prompt`, returning it alongside request metadata.
    /// Same failure taxonomy as the worker transport: `Timeout` on deadline
    /// exceeded, `BackendError` on an internal engine failure.
    pub async fn generate(
        &self,
        prompt: &str,
        trace_carrier: &HashMap<String, String>,
    ) -> Result<(String, GenerateMetadata), AgentverseError> {
        self.generate_with_max_tokens(prompt, None, trace_carrier).await
    }

    /// Same as [`generate`], with an explicit completion token budget (used
    /// by the Deliberator's synthesis call and the Synthesizer, both of
    /// which require larger budgets than the default).
    pub async fn generate_with_max_tokens(
        &self,
        prompt: &str,
        max_tokens: Option<u32>,
        trace_carrier: &HashMap<String, String>,
    ) -> Result<(String, GenerateMetadata), AgentverseError> {
        let request_id = new_request_id();
        let started = Instant::now();

        let result = timeout(
            self.timeout,
            self.backend.generate(prompt, max_tokens, Some(&request_id)),
        )
        .await
        .map_err(|_| AgentverseError::Timeout(format!("exceeded {:?}", self.timeout)))??;

        let metadata = GenerateMetadata {
            request_id,
            duration_seconds: started.elapsed().as_secs_f64(),
            queue_wait_seconds: result.queue_wait_seconds,
            prompt_tokens: result.prompt_tokens,
            completion_tokens: result.completion_tokens,
            trace_metadata: trace_carrier.clone(),
        };

        Ok((result.text, metadata))
    }
}
