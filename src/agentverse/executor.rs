// src/agentverse/executor.rs

use std::time::Instant;

use crate::agentverse::trace::TraceContext;
use crate::agentverse::transport::WorkerCaller;
use crate::agentverse::types::{ExecutionOutput, ExecutionResult, Expert, WorkerCallLog};

const DECISION_PREVIEW_CHARS: usize = 500;

/// Stage 3: fans out one subtask per expert in parallel.
pub struct Executor<'a> {
    transport: &'a dyn WorkerCaller,
}

impl<'a> Executor<'a> {
    pub fn new(transport: &'a dyn WorkerCaller) -> Self {
        Executor { transport }
    }

    /// Runs one subtask per expert concurrently and joins before returning
    /// (§4.7, §5: "joined before the stage completes"). `success` reflects
    /// only the transport layer - the Evaluator judges semantic quality.
    /// Returns the aggregate result alongside one [`WorkerCallLog`] per
    /// successful call, for the driver to fold into the dense
    /// `llm_requests` log (I2).
    pub async fn execute(
        &self,
        task: &str,
        experts: &[Expert],
        final_decision: &str,
        trace: &TraceContext,
    ) -> (ExecutionResult, Vec<WorkerCallLog>) {
        let decision_preview: String = final_decision.chars().take(DECISION_PREVIEW_CHARS).collect();

        let futures = experts.iter().map(|expert| {
            let subtask = build_subtask(expert, &decision_preview, task);
            let carrier = trace.carrier();
            async move {
                let started = Instant::now();
                match self
                    .transport
                    .call_worker(
                        &expert.endpoint,
                        &subtask,
                        expert.role.as_str(),
                        &expert.contract,
                        expert.index,
                        &carrier,
                    )
                    .await
                {
                    Ok(result) => {
                        let call_log = WorkerCallLog {
                            role: expert.role,
                            index: expert.index,
                            endpoint: expert.endpoint.clone(),
                            prompt: subtask.clone(),
                            response: result.output.clone(),
                            request_id: result.request_id,
                            duration_seconds: started.elapsed().as_secs_f64(),
                            round: None,
                        };
                        (
                            ExecutionOutput {
                                role: expert.role,
                                index: expert.index,
                                subtask,
                                output: result.output,
                                success: true,
                            },
                            Some(call_log),
                        )
                    }
                    Err(err) => (
                        ExecutionOutput {
                            role: expert.role,
                            index: expert.index,
                            subtask,
                            output: format!("Execution failed: {}", err),
                            success: false,
                        },
                        None,
                    ),
                }
            }
        });

        let results: Vec<(ExecutionOutput, Option<WorkerCallLog>)> =
            futures_util::future::join_all(futures).await;

        let mut outputs = Vec::with_capacity(results.len());
        let mut worker_calls = Vec::new();
        for (output, call_log) in results {
            if let Some(call_log) = call_log {
                worker_calls.push(call_log);
            }
            outputs.push(output);
        }

        let success_count = outputs.iter().filter(|o| o.success).count();
        let failure_count = outputs.len() - success_count;

        (
            ExecutionResult {
                outputs,
                success_count,
                failure_count,
            },
            worker_calls,
        )
    }
}

fn build_subtask(expert: &Expert, decision_preview: &str, task: &str) -> String {
    format!(
        "You are the {} expert. Your responsibilities: {}\n\n\
         Agreed plan:\n{}\n\n\
         Original task:\n{}\n\n\
         Carry out your part of the plan now.",
        expert.role.as_str(),
        expert.responsibilities,
        decision_preview,
        task
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentverse::error::AgentverseError;
    use crate::agentverse::transport::{WorkerCallResult, WorkerCaller};
    use crate::agentverse::types::Role;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FakeTransport {
        fail_endpoints: Vec<&'static str>,
    }

    #[async_trait]
    impl WorkerCaller for FakeTransport {
        async fn call_worker(
            &self,
            endpoint: &str,
            subtask: &str,
            _role: &str,
            _contract: &str,
            _index: usize,
            _trace_carrier: &HashMap<String, String>,
        ) -> Result<WorkerCallResult, AgentverseError> {
            if self.fail_endpoints.contains(&endpoint) {
                return Err(AgentverseError::ConnectFailed(endpoint.to_string()));
            }
            Ok(WorkerCallResult {
                output: format!("done: {}", &subtask[..subtask.len().min(10)]),
                llm_prompt: None,
                llm_response: None,
                llm_endpoint: None,
                backend_metadata: None,
                trace_metadata: None,
                request_id: "fake0000".to_string(),
            })
        }
    }

    fn expert(idx: usize, endpoint: &str) -> Expert {
        Expert {
            role: Role::Executor,
            responsibilities: "do stuff".into(),
            contract: "contract".into(),
            endpoint: endpoint.to_string(),
            index: idx,
        }
    }

    #[tokio::test]
    async fn success_and_failure_counts_sum_to_expert_count() {
        let transport = FakeTransport {
            fail_endpoints: vec!["http://bad"],
        };
        let executor = Executor::new(&transport);
        let experts = vec![expert(0, "http://w1"), expert(1, "http://bad"), expert(2, "http://w2")];
        let (result, _calls) = executor
            .execute("task", &experts, "plan", &TraceContext::new())
            .await;
        assert_eq!(result.success_count + result.failure_count, experts.len());
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 1);
    }

    #[tokio::test]
    async fn failed_call_produces_marked_output_without_raising() {
        let transport = FakeTransport {
            fail_endpoints: vec!["http://bad"],
        };
        let executor = Executor::new(&transport);
        let experts = vec![expert(0, "http://bad")];
        let (result, calls) = executor
            .execute("task", &experts, "plan", &TraceContext::new())
            .await;
        assert!(!result.outputs[0].success);
        assert!(result.outputs[0].output.starts_with("Execution failed:"));
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn decision_preview_is_truncated_to_500_chars() {
        let transport = FakeTransport { fail_endpoints: vec![] };
        let executor = Executor::new(&transport);
        let experts = vec![expert(0, "http://w1")];
        let long_decision = "x".repeat(1000);
        let (result, calls) = executor
            .execute("task", &experts, &long_decision, &TraceContext::new())
            .await;
        assert!(result.outputs[0].subtask.matches('x').count() <= DECISION_PREVIEW_CHARS);
        assert_eq!(calls.len(), 1);
    }
}
