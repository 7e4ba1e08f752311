// src/agentverse/synthesizer.rs

use crate::agentverse::error::AgentverseError;
use crate::agentverse::llm_client::{GenerateMetadata, LlmClient};
use crate::agentverse::trace::TraceContext;
use crate::agentverse::types::WorkflowState;

const SYNTHESIS_MAX_TOKENS: u32 = 4096;
const NO_EXECUTION_SENTINEL: &str =
    "No execution was performed; unable to produce a final answer.";

/// Stage 5 (implicit): produces the standalone, user-visible answer once
/// the iteration loop exits.
pub struct Synthesizer<'a> {
    llm: &'a LlmClient,
}

impl<'a> Synthesizer<'a> {
    pub fn new(llm: &'a LlmClient) -> Self {
        Synthesizer { llm }
    }

    /// Produces the final answer from the last execution, the iteration
    /// history, and the final evaluation (§4.10). If `state.execution` is
    /// `None`, returns a fixed sentinel rather than calling the LLM.
    pub async fn synthesize(
        &self,
        state: &WorkflowState,
        trace: &TraceContext,
    ) -> Result<(String, String, String, Option<GenerateMetadata>), AgentverseError> {
        let execution = match &state.execution {
            Some(execution) => execution,
            None => {
                return Ok((
                    NO_EXECUTION_SENTINEL.to_string(),
                    String::new(),
                    NO_EXECUTION_SENTINEL.to_string(),
                    None,
                ))
            }
        };

        let prompt = build_synthesis_prompt(state, execution);
        let carrier = trace.carrier();
        let (final_output, meta) = self
            .llm
            .generate_with_max_tokens(&prompt, Some(SYNTHESIS_MAX_TOKENS), &carrier)
            .await?;

        Ok((final_output.clone(), prompt, final_output, Some(meta)))
    }
}

fn build_synthesis_prompt(
    state: &WorkflowState,
    execution: &crate::agentverse::types::ExecutionResult,
) -> String {
    let mut outputs = String::new();
    for output in &execution.outputs {
        outputs.push_str(&format!(
            "[{} #{}]: {}\n",
            output.role.as_str(),
            output.index,
            output.output
        ));
    }

    let mut history = String::new();
    for summary in &state.iteration_history {
        history.push_str(&format!(
            "iteration {}: score={} goal_achieved={}\n",
            summary.iteration, summary.score, summary.goal_achieved
        ));
    }

    let evaluation_note = state
        .evaluation
        .as_ref()
        .map(|evaluation| format!("Final evaluation score: {}.", evaluation.score))
        .unwrap_or_default();

    format!(
        "Original task:\n{}\n\nExpert outputs from the final iteration:\n{}\n\
         Iteration history:\n{}\n{}\n\n\
         Write a standalone, complete answer to the original task. Do not reference \
         \"the above\", \"the discussion\", or any other part of this prompt - the answer \
         must be understandable entirely on its own.",
        state.original_task, outputs, history, evaluation_note
    )
}
