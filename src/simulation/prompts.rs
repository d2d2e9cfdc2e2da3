//! Prompt templates for the simulated user, agent, tool and judge roles.
//!
//! Templates are plain constants with `{placeholder}` markers filled by the
//! `build_*` functions below.

use serde_json::Value;

use crate::trajectory::{AgentConfig, Criterion, Task, ToolCall, ToolDefinition, UserPersona};

/// System prompt for the simulated user.
pub const USER_SYSTEM: &str = r#"You are a user talking to an AI agent that can call tools on your behalf.

# Task
{task}

# User characteristics
{characteristics}

# Rules
- Write exactly one message at a time, the way this user would type it.
- Reveal the task step by step. Only give the information the current step needs.
- Never invent facts that are not in the task. If the agent asks for something you
  were not given, say you do not have it and offer what you do know instead.
- Do not repeat the task text verbatim; say it in your own words.
- Stay in character for the whole conversation.
- Keep every constraint exactly as stated (dates, budgets, names, "same" vs "similar").

# When not to finish
- You have not yet stated all of your requirements.
- The agent has not completed every part of the task, or its results look wrong or incomplete.

# When to finish
- Every part of the task has been completed correctly, or the agent has clearly explained
  that it cannot do it after you stated your full requirements.
- To finish, reply with exactly "{sentinel}" and nothing else."#;

/// First user turn.
pub const USER_OPENING: &str = r#"The assistant greets you: "What can I help you with today?"

Reply in your own words and start describing what you need. Match your personality and
only reveal what is needed for the first step."#;

/// Every later user turn.
pub const USER_CONTINUE: &str = r#"Conversation so far:
{transcript}

Write the user's next message. Stay in character and keep moving the task forward."#;

/// Appended to the agent's own system prompt.
pub const AGENT_PROTOCOL: &str = r#"
# Operating rules
1. If the conversation contains everything needed for a call, call exactly one tool by
   replying with only a JSON block in this format:
```json
{"name": "function_name", "arguments": {"key": "value"}}
```
   Include only arguments the user actually gave you. Leave optional ones out otherwise.
2. If information is missing, ask the user a short, clear question instead. Never guess,
   and never mix a question and a tool call in the same reply.
3. Tool results arrive as messages starting with "execution:". Read them carefully,
   handle failures, and tell the user what happened.
4. Only use the tools listed below.

# Available tools
{tools}"#;

/// System prompt for LLM-backed tool result synthesis.
pub const TOOL_SYSTEM: &str = r#"You simulate the execution of software tools. Given a tool's description, the call
arguments, the current state of the session and the required outcome, produce the result
the real tool would most plausibly return.

- Keep results consistent with the current state and with earlier results.
- Follow the shape of the tool's examples when they exist.
- Respond with a single JSON object and nothing else:
  {"result": <tool output>, "error": {"type": "...", "message": "..."}}
  Omit "error" when the outcome is success."#;

/// Per-call tool synthesis request.
pub const TOOL_CALL: &str = r#"Tool schema:
{schema}

Examples:
{examples}

Call:
{call}

Current state:
{state}

Required outcome: {outcome}
- success: the call works and returns complete data.
- partial_failure: the call works but the data is incomplete or comes with a warning.
- failure: the call fails (invalid input, missing record, permission, upstream error)."#;

/// System prompt for the quality judge.
pub const JUDGE_SYSTEM: &str = r#"You are an expert evaluator of multi-turn conversations between users and tool-using
AI agents. Score each criterion you are given on a scale from 1 to {max_score}:
1 poor, 2 below average, 3 average, 4 good, 5 excellent.
Judge only what is observable in the transcript and the tool results. Be strict and consistent."#;

/// Whole-rubric judge request.
pub const JUDGE_RUBRIC: &str = r#"Task: {task}

Success criteria:
{success_criteria}

Tool usage expectations:
{tool_expectations}

Transcript:
{transcript}

Score every criterion below:
{criteria}

Answer with a JSON object only:
```json
{"scores": {{score_template}}, "feedback": "one short paragraph"}
```"#;

/// Single-criterion judge request.
pub const JUDGE_CRITERION: &str = r#"Task: {task}

Transcript:
{transcript}

Criterion "{name}": {description}

Answer with a JSON object only:
```json
{"score": <number>, "feedback": "one sentence"}
```"#;

pub fn build_user_system(task: &Task, persona: &UserPersona, sentinel: &str) -> String {
    USER_SYSTEM
        .replace("{task}", &task.description)
        .replace("{characteristics}", &persona.characteristics())
        .replace("{sentinel}", sentinel)
}

pub fn build_user_continue(transcript: &str) -> String {
    USER_CONTINUE.replace("{transcript}", transcript)
}

/// Agent system prompt: its own instructions plus the calling protocol.
pub fn build_agent_system(agent: &AgentConfig) -> String {
    let tools = agent
        .tools
        .iter()
        .map(|t| serde_json::to_string_pretty(&t.to_function_schema()).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{}\n{}",
        agent.system_prompt.trim_end(),
        AGENT_PROTOCOL.replace("{tools}", &tools)
    )
}

pub fn build_tool_call(
    tool: &ToolDefinition,
    call: &ToolCall,
    state: &Value,
    outcome: &str,
) -> String {
    let examples = if tool.examples.is_empty() {
        "(none)".to_string()
    } else {
        serde_json::to_string_pretty(&tool.examples).unwrap_or_default()
    };
    let call_json = serde_json::json!({"name": call.name, "arguments": call.arguments});
    TOOL_CALL
        .replace(
            "{schema}",
            &serde_json::to_string_pretty(&tool.to_function_schema()).unwrap_or_default(),
        )
        .replace("{examples}", &examples)
        .replace("{call}", &call_json.to_string())
        .replace("{state}", &serde_json::to_string_pretty(state).unwrap_or_default())
        .replace("{outcome}", outcome)
}

pub fn build_judge_system(max_score: f64) -> String {
    JUDGE_SYSTEM.replace("{max_score}", &format!("{max_score}"))
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- (none given)".to_string();
    }
    items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_judge_rubric(task: &Task, transcript: &str, criteria: &[Criterion]) -> String {
    let listed = criteria
        .iter()
        .map(|c| format!("- {}: {}", c.name, c.description))
        .collect::<Vec<_>>()
        .join("\n");
    let template = criteria
        .iter()
        .map(|c| format!("\"{}\": <number>", c.name))
        .collect::<Vec<_>>()
        .join(", ");
    JUDGE_RUBRIC
        .replace("{task}", &task.description)
        .replace("{success_criteria}", &bullet_list(&task.rubric.success_criteria))
        .replace(
            "{tool_expectations}",
            &bullet_list(&task.rubric.tool_usage_expectations),
        )
        .replace("{transcript}", transcript)
        .replace("{criteria}", &listed)
        .replace("{score_template}", &template)
}

pub fn build_judge_criterion(task: &Task, transcript: &str, criterion: &Criterion) -> String {
    JUDGE_CRITERION
        .replace("{task}", &task.description)
        .replace("{transcript}", transcript)
        .replace("{name}", &criterion.name)
        .replace("{description}", &criterion.description)
}
