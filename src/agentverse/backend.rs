// src/agentverse/backend.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::time::sleep;

use crate::agentverse::error::AgentverseError;

/// Output of one `generate` call: the produced text plus everything C2
/// needs to populate an `LlmRequestRecord.backend_metadata`.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub text: String,
    pub queue_wait_seconds: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A generation service hosting one in-process engine. Implementors may
/// batch concurrent requests internally; callers only see the async
/// boundary.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: Option<u32>,
        request_id: Option<&str>,
    ) -> Result<GenerateResult, AgentverseError>;
}

/// A pluggable text generator. The model itself is out of scope (treated as
/// a black box per the spec); production callers inject a real client here,
/// tests and demos use [`echo_generator`].
pub type GeneratorFn = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Deterministic stand-in generator used by tests and the bundled demo: it
/// does not call any real model, it just echoes a bounded amount of the
/// prompt back so callers exercise the full request/response path.
pub fn echo_generator() -> GeneratorFn {
    Box::new(|prompt: &str| {
        let preview: String = prompt.chars().take(120).collect();
        format!("[echo] {}", preview)
    })
}

/// In-process async generation engine.
///
/// Admission is never gated: every concurrent `generate` call is admitted
/// immediately and tracked by an in-flight gauge. This follows §4.3's
/// "no explicit cap beyond the engine's internal scheduler" rather than the
/// reference Python backend's hard `threading.Semaphore`, which would
/// reintroduce the cap the spec disclaims (see SPEC_FULL.md open questions).
pub struct LocalEngine {
    generator: GeneratorFn,
    default_system_prompt: String,
    apply_chat_template: bool,
    inflight: Arc<AtomicU64>,
    requests_total: Arc<AtomicU64>,
    requests_failed: Arc<AtomicU64>,
    prompt_tokens_total: Arc<AtomicU64>,
    completion_tokens_total: Arc<AtomicU64>,
}

impl LocalEngine {
    pub fn new(default_system_prompt: impl Into<String>, apply_chat_template: bool) -> Self {
        LocalEngine {
            generator: echo_generator(),
            default_system_prompt: default_system_prompt.into(),
            apply_chat_template,
            inflight: Arc::new(AtomicU64::new(0)),
            requests_total: Arc::new(AtomicU64::new(0)),
            requests_failed: Arc::new(AtomicU64::new(0)),
            prompt_tokens_total: Arc::new(AtomicU64::new(0)),
            completion_tokens_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_generator(mut self, generator: GeneratorFn) -> Self {
        self.generator = generator;
        self
    }

    /// Current in-flight count (observational gauge, §4.3).
    pub fn inflight(&self) -> u64 {
        self.inflight.load(Ordering::Relaxed)
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn requests_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    pub fn prompt_tokens_total(&self) -> u64 {
        self.prompt_tokens_total.load(Ordering::Relaxed)
    }

    pub fn completion_tokens_total(&self) -> u64 {
        self.completion_tokens_total.load(Ordering::Relaxed)
    }

    /// Wraps a raw prompt in a role-tagged chat template with the
    /// configured default system prompt, unless `skip_chat_template` is
    /// set or the engine was built with `apply_chat_template = false`.
    fn apply_template(&self, prompt: &str, skip_chat_template: bool) -> String {
        if !self.apply_chat_template || skip_chat_template {
            return prompt.to_string();
        }
        format!(
            "<|system|>\n{}\n<|user|>\n{}\n<|assistant|>\n",
            self.default_system_prompt, prompt
        )
    }

    fn count_tokens(text: &str) -> u64 {
        text.split_whitespace().count() as u64
    }

    /// Truncates generated text to `max_tokens` whitespace-separated
    /// tokens. The real token budget enforcement belongs to the model
    /// itself (out of scope); this only keeps the stub generator honest
    /// about the budget callers asked for.
    fn enforce_max_tokens(text: String, max_tokens: Option<u32>) -> String {
        match max_tokens {
            Some(limit) => text
                .split_whitespace()
                .take(limit as usize)
                .collect::<Vec<_>>()
                .join(" "),
            None => text,
        }
    }

    pub async fn generate_with_options(
        &self,
        prompt: &str,
        max_tokens: Option<u32>,
        request_id: Option<&str>,
        skip_chat_template: bool,
    ) -> Result<GenerateResult, AgentverseError> {
        let admitted_at = Instant::now();
        let inflight_at_start = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "generate START request_id={:?} inflight={}",
            request_id, inflight_at_start
        );

        // Cooperative yield so truly concurrent callers interleave instead
        // of running the "engine" lock-step; stands in for the batching
        // scheduler's admission delay.
        sleep(Duration::from_millis(1)).await;
        let queue_wait_seconds = admitted_at.elapsed().as_secs_f64();

        let templated = self.apply_template(prompt, skip_chat_template);
        let prompt_tokens = Self::count_tokens(&templated);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (self.generator)(&templated)
        }));

        let remaining = self.inflight.fetch_sub(1, Ordering::SeqCst) - 1;
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(text) => {
                let text = Self::enforce_max_tokens(text, max_tokens);
                let completion_tokens = Self::count_tokens(&text);
                self.prompt_tokens_total
                    .fetch_add(prompt_tokens, Ordering::Relaxed);
                self.completion_tokens_total
                    .fetch_add(completion_tokens, Ordering::Relaxed);
                debug!(
                    "generate PROGRESS request_id={:?} completion_tokens={}",
                    request_id, completion_tokens
                );
                info!(
                    "generate DONE request_id={:?} prompt_tokens={} completion_tokens={} inflight={}",
                    request_id, prompt_tokens, completion_tokens, remaining
                );
                Ok(GenerateResult {
                    text,
                    queue_wait_seconds,
                    prompt_tokens,
                    completion_tokens,
                })
            }
            Err(_) => {
                self.requests_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "generate ERROR request_id={:?} elapsed={:.3}s",
                    request_id,
                    admitted_at.elapsed().as_secs_f64()
                );
                Err(AgentverseError::BackendError(
                    "generation engine panicked".to_string(),
                ))
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for LocalEngine {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: Option<u32>,
        request_id: Option<&str>,
    ) -> Result<GenerateResult, AgentverseError> {
        self.generate_with_options(prompt, max_tokens, request_id, false)
            .await
    }
}
