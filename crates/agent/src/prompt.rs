//! Prompt assembly for each cycle.

use caduceus_core::{CapabilityRegistry, Transcript};

/// Role instructions used when the caller supplies none.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a clinical decision-support assistant. \
Reason step by step, use the available tools to gather facts you are not certain of, \
and never invent measurements or results.";

const RESPONSE_FORMAT: &str = r#"## Response format
Respond with exactly one JSON object and nothing else.

To use a tool:
{"thought": "<why this tool>", "action": {"tool": "<tool name>", "args": {<arguments>}}}

When you have enough information:
{"thought": "<summary of reasoning>", "final_answer": <answer>}

Call at most one tool per response. Give a final_answer only once you no longer need tools."#;

/// The system prompt: role, tool catalogue, response contract.
pub fn system_prompt(custom: Option<&str>, tools: &CapabilityRegistry) -> String {
    let mut out = String::new();
    out.push_str(custom.unwrap_or(DEFAULT_SYSTEM_PROMPT).trim());
    out.push_str("\n\n## Tools\n");

    if tools.is_empty() {
        out.push_str("No tools are available for this task; answer directly.\n");
    } else {
        for capability in tools.list() {
            let schema = serde_json::to_string(capability.schema()).unwrap_or_default();
            out.push_str(&format!(
                "- {}: {}\n  args schema: {}\n",
                capability.name(),
                capability.description(),
                schema
            ));
        }
    }

    out.push('\n');
    out.push_str(RESPONSE_FORMAT);
    out
}

/// The per-cycle user prompt: the task plus everything observed so far.
pub fn cycle_prompt(task: &str, transcript: &Transcript, iteration: u32, max_iterations: u32) -> String {
    let mut out = format!("## Task\n{}\n", task.trim());

    if !transcript.is_empty() {
        out.push_str("\n## Progress so far\n");
        out.push_str(&transcript.render());
        out.push('\n');
    }

    out.push_str(&format!("\nIteration {iteration} of {max_iterations}."));
    if iteration == max_iterations {
        out.push_str(" This is the last iteration: respond with your final_answer now.");
    }
    out
}
