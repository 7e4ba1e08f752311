// src/agentverse/evaluator.rs

use log::info;
use serde_json::{json, Value};

use crate::agentverse::error::AgentverseError;
use crate::agentverse::llm_client::{GenerateMetadata, LlmClient};
use crate::agentverse::parser::parse_structured;
use crate::agentverse::trace::TraceContext;
use crate::agentverse::types::{Evaluation, EvaluationCriteria, ExecutionResult};

const DEFAULT_SCORE: u8 = 50;

/// Stage 4: scores the execution result and decides whether to iterate.
pub struct Evaluator<'a> {
    llm: &'a LlmClient,
}

impl<'a> Evaluator<'a> {
    pub fn new(llm: &'a LlmClient) -> Self {
        Evaluator { llm }
    }

    /// Runs the evaluation algorithm (§4.8). `success_threshold` and
    /// `iteration`/`max_iterations` are authoritative overrides applied
    /// after the model's own verdict is parsed.
    pub async fn evaluate(
        &self,
        task: &str,
        execution: &ExecutionResult,
        success_threshold: u8,
        iteration: u32,
        max_iterations: u32,
        trace: &TraceContext,
    ) -> Result<(Evaluation, String, String, GenerateMetadata), AgentverseError> {
        let prompt = build_evaluation_prompt(task, execution);
        let carrier = trace.carrier();
        let (response, meta) = self.llm.generate(&prompt, &carrier).await?;

        let parsed = parse_structured(&response, json!({}));
        let evaluation = interpret(&parsed, success_threshold, iteration, max_iterations);

        info!(
            "evaluate: score={} goal_achieved={} should_iterate={}",
            evaluation.score, evaluation.goal_achieved, evaluation.should_iterate
        );

        Ok((evaluation, prompt, response, meta))
    }
}

fn interpret(parsed: &Value, success_threshold: u8, iteration: u32, max_iterations: u32) -> Evaluation {
    let mut goal_achieved = parsed.get("goal_achieved").and_then(Value::as_bool).unwrap_or(false);
    let score = parsed
        .get("score")
        .and_then(score_as_u8)
        .unwrap_or(DEFAULT_SCORE);
    let mut should_iterate = parsed.get("should_iterate").and_then(Value::as_bool).unwrap_or(false);
    let mut feedback = parsed
        .get("feedback")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let missing_aspects = parsed
        .get("missing_aspects")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let criteria = parsed.get("criteria").and_then(parse_criteria);
    let rationale = parsed
        .get("rationale")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);

    // Threshold override (authoritative): §4.8 rule 2.
    if success_threshold > 0 {
        if score >= success_threshold {
            goal_achieved = true;
            should_iterate = false;
        } else {
            goal_achieved = false;
            should_iterate = true;
        }
    }

    // Budget override: §4.8 rule 3.
    if iteration + 1 >= max_iterations {
        should_iterate = false;
    }

    // Consistency override: §4.8 rule 4.
    if goal_achieved {
        should_iterate = false;
    }

    // Feedback fallback: §4.8 rule 5.
    if should_iterate && feedback.trim().is_empty() {
        feedback = synthesize_feedback(rationale.as_deref(), &missing_aspects, score, success_threshold);
    }

    Evaluation {
        goal_achieved,
        score,
        criteria,
        rationale,
        feedback,
        missing_aspects,
        should_iterate,
    }
}

fn score_as_u8(value: &Value) -> Option<u8> {
    if let Some(i) = value.as_i64() {
        return Some(i.clamp(0, 100) as u8);
    }
    // Open question in SPEC_FULL.md: intermediate paths sometimes carry a
    // float score; this crate always rounds to the nearest integer.
    value.as_f64().map(|f| f.round().clamp(0.0, 100.0) as u8)
}

fn parse_criteria(value: &Value) -> Option<EvaluationCriteria> {
    let obj = value.as_object()?;
    let field = |name: &str| {
        obj.get(name)
            .and_then(score_as_u8)
            .unwrap_or(0)
    };
    Some(EvaluationCriteria {
        completeness: field("completeness"),
        correctness: field("correctness"),
        clarity: field("clarity"),
        relevance: field("relevance"),
        actionability: field("actionability"),
    })
}

fn synthesize_feedback(
    rationale: Option<&str>,
    missing_aspects: &[String],
    score: u8,
    success_threshold: u8,
) -> String {
    if let Some(rationale) = rationale {
        if !missing_aspects.is_empty() {
            return format!("{} Missing: {}.", rationale, missing_aspects.join(", "));
        }
        return rationale.to_string();
    }
    if !missing_aspects.is_empty() {
        return format!("Missing: {}.", missing_aspects.join(", "));
    }
    if success_threshold > 0 {
        format!("Score {} below threshold {}.", score, success_threshold)
    } else {
        format!("Score {} did not meet the goal; please improve.", score)
    }
}

fn build_evaluation_prompt(task: &str, execution: &ExecutionResult) -> String {
    let mut outputs = String::new();
    for output in &execution.outputs {
        outputs.push_str(&format!(
            "[{} #{}] (success={}):\n{}\n\n",
            output.role.as_str(),
            output.index,
            output.success,
            output.output
        ));
    }
    format!(
        "Task: {}\n\nExpert outputs:\n{}\n\
         Evaluate whether the task was accomplished. Respond with a JSON object: \
         {{\"goal_achieved\": bool, \"score\": 0-100, \"criteria\": {{\"completeness\": 0-100, \
         \"correctness\": 0-100, \"clarity\": 0-100, \"relevance\": 0-100, \"actionability\": 0-100}}, \
         \"rationale\": \"...\", \"feedback\": \"...\", \"missing_aspects\": [...], \"should_iterate\": bool}}.",
        task, outputs
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentverse::backend::LocalEngine;
    use crate::agentverse::types::{ExecutionOutput, Role};
    use std::sync::Arc;
    use std::time::Duration;

    fn llm_with_response(response: &'static str) -> LlmClient {
        let engine = LocalEngine::new("sys", false).with_generator(Box::new(move |_: &str| response.to_string()));
        LlmClient::new(Arc::new(engine), Duration::from_secs(5))
    }

    fn execution() -> ExecutionResult {
        ExecutionResult {
            outputs: vec![ExecutionOutput {
                role: Role::Executor,
                index: 0,
                subtask: "do it".into(),
                output: "4".into(),
                success: true,
            }],
            success_count: 1,
            failure_count: 0,
        }
    }

    #[tokio::test]
    async fn threshold_override_forces_goal_achieved_when_score_meets_it() {
        let llm = llm_with_response(r#"{"score": 90, "should_iterate": true}"#);
        let evaluator = Evaluator::new(&llm);
        let (evaluation, _, _, _) = evaluator
            .evaluate("task", &execution(), 70, 0, 3, &TraceContext::new())
            .await
            .unwrap();
        assert!(evaluation.goal_achieved);
        assert!(!evaluation.should_iterate);
        assert_eq!(evaluation.score, 90);
    }

    #[tokio::test]
    async fn threshold_override_forces_iteration_when_score_is_below() {
        let llm = llm_with_response(r#"{"score": 40, "goal_achieved": true}"#);
        let evaluator = Evaluator::new(&llm);
        let (evaluation, _, _, _) = evaluator
            .evaluate("task", &execution(), 70, 0, 3, &TraceContext::new())
            .await
            .unwrap();
        assert!(!evaluation.goal_achieved);
        assert!(evaluation.should_iterate);
    }

    #[tokio::test]
    async fn budget_override_stops_iteration_at_last_slot() {
        let llm = llm_with_response(r#"{"score": 10, "should_iterate": true}"#);
        let evaluator = Evaluator::new(&llm);
        // iteration + 1 == max_iterations -> must not iterate further.
        let (evaluation, _, _, _) = evaluator
            .evaluate("task", &execution(), 0, 1, 2, &TraceContext::new())
            .await
            .unwrap();
        assert!(!evaluation.should_iterate);
    }

    #[tokio::test]
    async fn goal_achieved_forces_no_iteration_even_if_model_disagrees() {
        let llm = llm_with_response(r#"{"goal_achieved": true, "should_iterate": true, "score": 60}"#);
        let evaluator = Evaluator::new(&llm);
        let (evaluation, _, _, _) = evaluator
            .evaluate("task", &execution(), 0, 0, 5, &TraceContext::new())
            .await
            .unwrap();
        assert!(!evaluation.should_iterate);
    }

    #[tokio::test]
    async fn feedback_fallback_synthesizes_when_empty() {
        let llm = llm_with_response(r#"{"score": 30, "missing_aspects": ["tests", "docs"]}"#);
        let evaluator = Evaluator::new(&llm);
        let (evaluation, _, _, _) = evaluator
            .evaluate("task", &execution(), 70, 0, 5, &TraceContext::new())
            .await
            .unwrap();
        assert!(evaluation.feedback.contains("tests"));
        assert!(evaluation.feedback.contains("docs"));
    }

    #[tokio::test]
    async fn parser_tolerance_handles_fenced_json() {
        let llm = llm_with_response("```json\n{\"score\": 80}\n```");
        let evaluator = Evaluator::new(&llm);
        let (evaluation, _, _, _) = evaluator
            .evaluate("task", &execution(), 0, 0, 5, &TraceContext::new())
            .await
            .unwrap();
        assert_eq!(evaluation.score, 80);
    }

    #[test]
    fn float_scores_are_rounded_to_nearest_integer() {
        assert_eq!(score_as_u8(&json!(79.6)), Some(80));
        assert_eq!(score_as_u8(&json!(79.4)), Some(79));
    }
}
