// src/agentverse/recruiter.rs

use log::info;
use serde_json::{json, Value};

use crate::agentverse::config::Config;
use crate::agentverse::error::AgentverseError;
use crate::agentverse::llm_client::{GenerateMetadata, LlmClient};
use crate::agentverse::parser::parse_structured;
use crate::agentverse::trace::TraceContext;
use crate::agentverse::types::{Expert, Recruitment, Role, Topology};

/// Stage 1: produce a `Recruitment` from the task and optional feedback.
pub struct Recruiter<'a> {
    config: &'a Config,
    llm: &'a LlmClient,
}

impl<'a> Recruiter<'a> {
    pub fn new(config: &'a Config, llm: &'a LlmClient) -> Self {
        Recruiter { config, llm }
    }

    /// Runs the recruitment algorithm (§4.5). Fatal only when
    /// `WORKER_URLS` is empty - any other shortcoming in the model's
    /// response degrades gracefully to a default single-expert crew.
    pub async fn recruit(
        &self,
        task: &str,
        feedback: Option<&str>,
        trace: &TraceContext,
    ) -> Result<(Recruitment, String, String, GenerateMetadata), AgentverseError> {
        self.config.require_worker_urls()?;

        let prompt = build_recruitment_prompt(task, feedback);
        let carrier = trace.carrier();
        let (response, meta) = self.llm.generate(&prompt, &carrier).await?;

        let parsed = parse_structured(&response, json!({}));
        let recruitment = self.interpret(&parsed);

        info!(
            "recruit: {} expert(s), topology={:?}",
            recruitment.experts.len(),
            recruitment.topology
        );

        Ok((recruitment, prompt, response, meta))
    }

    fn interpret(&self, parsed: &Value) -> Recruitment {
        let raw_experts = parsed
            .get("experts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut experts: Vec<Expert> = raw_experts
            .into_iter()
            .take(self.config.max_workers)
            .enumerate()
            .map(|(idx, entry)| {
                let role = entry
                    .get("role")
                    .and_then(Value::as_str)
                    .map(Role::parse_or_executor)
                    .unwrap_or(Role::Executor);
                let responsibilities = entry
                    .get("responsibilities")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let contract = entry
                    .get("contract")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                Expert {
                    role,
                    responsibilities,
                    contract,
                    endpoint: self.config.worker_url_for(idx).to_string(),
                    index: idx,
                }
            })
            .collect();

        if experts.is_empty() {
            experts.push(Expert {
                role: Role::Executor,
                responsibilities: "Complete the task directly.".to_string(),
                contract: "Produce a complete, correct answer to the task.".to_string(),
                endpoint: self.config.worker_url_for(0).to_string(),
                index: 0,
            });
        }

        let topology = parsed
            .get("communication_structure")
            .and_then(Value::as_str)
            .map(Topology::parse_or_horizontal)
            .unwrap_or(Topology::Horizontal);

        let execution_order = parsed
            .get("execution_order")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|entries| !entries.is_empty())
            .unwrap_or_else(|| experts.iter().map(|e| e.role.as_str().to_string()).collect());

        let reasoning = parsed
            .get("reasoning")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_reasoning(topology, &experts));

        Recruitment {
            experts,
            topology,
            execution_order,
            reasoning,
        }
    }
}

/// A default single-`executor` crew bound to `WORKER_URLS[0]`.
///
/// Used both when the model's `experts` list parses empty (§4.5 step 4)
/// and by the driver when the recruitment LLM call itself fails with a
/// recoverable error - recruitment degrades gracefully either way.
pub fn default_recruitment(config: &Config) -> Recruitment {
    let experts = vec![Expert {
        role: Role::Executor,
        responsibilities: "Complete the task directly.".to_string(),
        contract: "Produce a complete, correct answer to the task.".to_string(),
        endpoint: config.worker_url_for(0).to_string(),
        index: 0,
    }];
    let reasoning = default_reasoning(Topology::Horizontal, &experts);
    Recruitment {
        execution_order: experts.iter().map(|e| e.role.as_str().to_string()).collect(),
        experts,
        topology: Topology::Horizontal,
        reasoning,
    }
}

fn default_reasoning(topology: Topology, experts: &[Expert]) -> String {
    let roles: Vec<&str> = experts.iter().map(|e| e.role.as_str()).collect();
    format!(
        "Chose {:?} topology with experts: {}",
        topology,
        roles.join(", ")
    )
}

fn build_recruitment_prompt(task: &str, feedback: Option<&str>) -> String {
    let mut prompt = format!(
        "You are recruiting a team of experts to accomplish the following task:\n\n{}\n\n\
         Respond with a JSON object: {{\"experts\": [{{\"role\": ..., \"responsibilities\": ..., \"contract\": ...}}], \
         \"communication_structure\": \"horizontal\"|\"vertical\", \"execution_order\": [...], \"reasoning\": \"...\"}}.",
        task
    );
    if let Some(feedback) = feedback {
        if !feedback.trim().is_empty() {
            prompt.push_str(&format!(
                "\n\nPrevious iteration feedback to address:\n{}",
                feedback
            ));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentverse::backend::LocalEngine;
    use std::sync::Arc;
    use std::time::Duration;

    fn config_with(worker_urls: Vec<&str>) -> Config {
        Config {
            llm_url: "http://llm".into(),
            worker_urls: worker_urls.into_iter().map(str::to_string).collect(),
            max_workers: 5,
            max_rounds: 3,
            max_vertical_iters: 3,
            llm_timeout: Duration::from_secs(5),
            worker_timeout: Duration::from_secs(5),
            default_system_prompt: "sys".into(),
            apply_chat_template: false,
        }
    }

    fn llm_with_response(response: &'static str) -> LlmClient {
        let engine = LocalEngine::new("sys", false).with_generator(Box::new(move |_: &str| response.to_string()));
        LlmClient::new(Arc::new(engine), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn fatal_when_worker_urls_empty() {
        let config = config_with(vec![]);
        let llm = llm_with_response("{}");
        let recruiter = Recruiter::new(&config, &llm);
        let result = recruiter.recruit("task", None, &TraceContext::new()).await;
        assert!(matches!(result, Err(AgentverseError::ConfigError(_))));
    }

    #[tokio::test]
    async fn empty_experts_falls_back_to_default_executor() {
        let config = config_with(vec!["http://w1", "http://w2"]);
        let llm = llm_with_response("{}");
        let recruiter = Recruiter::new(&config, &llm);
        let (recruitment, _, _, _) = recruiter.recruit("task", None, &TraceContext::new()).await.unwrap();
        assert_eq!(recruitment.experts.len(), 1);
        assert_eq!(recruitment.experts[0].role, Role::Executor);
        assert_eq!(recruitment.experts[0].endpoint, "http://w1");
    }

    #[tokio::test]
    async fn round_robin_assigns_endpoints_by_index() {
        let config = config_with(vec!["http://w1", "http://w2"]);
        let response = r#"{"experts": [
            {"role": "planner", "responsibilities": "plan", "contract": "c1"},
            {"role": "critic", "responsibilities": "critique", "contract": "c2"},
            {"role": "researcher", "responsibilities": "research", "contract": "c3"}
        ]}"#;
        let llm = llm_with_response(response);
        let recruiter = Recruiter::new(&config, &llm);
        let (recruitment, _, _, _) = recruiter.recruit("task", None, &TraceContext::new()).await.unwrap();
        assert_eq!(recruitment.experts[0].endpoint, "http://w1");
        assert_eq!(recruitment.experts[1].endpoint, "http://w2");
        assert_eq!(recruitment.experts[2].endpoint, "http://w1");
    }

    #[tokio::test]
    async fn unknown_topology_defaults_to_horizontal() {
        let config = config_with(vec!["http://w1"]);
        let llm = llm_with_response(r#"{"communication_structure": "diagonal"}"#);
        let recruiter = Recruiter::new(&config, &llm);
        let (recruitment, _, _, _) = recruiter.recruit("task", None, &TraceContext::new()).await.unwrap();
        assert_eq!(recruitment.topology, Topology::Horizontal);
    }

    #[tokio::test]
    async fn experts_are_truncated_to_max_workers() {
        let mut config = config_with(vec!["http://w1"]);
        config.max_workers = 2;
        let response = r#"{"experts": [
            {"role": "planner"}, {"role": "critic"}, {"role": "researcher"}
        ]}"#;
        let llm = llm_with_response(response);
        let recruiter = Recruiter::new(&config, &llm);
        let (recruitment, _, _, _) = recruiter.recruit("task", None, &TraceContext::new()).await.unwrap();
        assert_eq!(recruitment.experts.len(), 2);
    }
}
