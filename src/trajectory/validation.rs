//! Structural checks on completed transcripts.
//!
//! Verifies the turn-taking shape of a trajectory:
//! user → agent, where an agent tool call is answered by exactly one tool
//! result before the agent speaks again, and an agent reply hands control
//! back to the user.

use thiserror::Error;

use super::types::{MessagePayload, Role, TerminationReason, Trajectory};

/// A way in which a transcript breaks the turn-taking rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("transcript is empty")]
    Empty,

    #[error("transcript must start with a user message, found {found}")]
    MustStartWithUser { found: &'static str },

    #[error("message {index}: {found} cannot follow {previous}")]
    UnexpectedSuccessor {
        index: usize,
        previous: &'static str,
        found: &'static str,
    },

    #[error("message {index}: tool result answers '{got}' but the pending call is '{expected}'")]
    CallIdMismatch {
        index: usize,
        expected: String,
        got: String,
    },

    #[error("message {index}: role {role} does not match payload {kind}")]
    RoleMismatch {
        index: usize,
        role: Role,
        kind: &'static str,
    },

    #[error("message {index}: turn index {found} but expected {expected}")]
    TurnIndex {
        index: usize,
        expected: u32,
        found: u32,
    },

    #[error("transcript ends with an unanswered tool call (terminated as {termination})")]
    DanglingToolCall { termination: TerminationReason },

    #[error("goal_reached trajectory must end with a user message")]
    GoalWithoutUserMessage,

    #[error("turn_count is {recorded} but the transcript has {actual} user messages")]
    TurnCount { recorded: u32, actual: u32 },

    #[error("{actual} user turns exceed the budget of {budget}")]
    TurnBudgetExceeded { budget: u32, actual: u32 },
}

/// Checks every turn-taking invariant of `trajectory`.
///
/// `max_turns`, when given, also bounds the number of user turns.
pub fn validate_transcript(
    trajectory: &Trajectory,
    max_turns: Option<u32>,
) -> Result<(), TranscriptError> {
    let messages = &trajectory.messages;
    let Some(first) = messages.first() else {
        // A rollout may die before the opening user message exists.
        let aborted = matches!(
            trajectory.termination,
            TerminationReason::ProtocolViolation | TerminationReason::FatalError
        );
        return if aborted && trajectory.turn_count == 0 {
            Ok(())
        } else {
            Err(TranscriptError::Empty)
        };
    };
    if !matches!(first.payload, MessagePayload::User { .. }) {
        return Err(TranscriptError::MustStartWithUser {
            found: first.payload.kind(),
        });
    }

    let mut user_turns = 0u32;
    let mut pending_call: Option<&str> = None;

    for (index, message) in messages.iter().enumerate() {
        if message.role != message.payload.role() {
            return Err(TranscriptError::RoleMismatch {
                index,
                role: message.role,
                kind: message.payload.kind(),
            });
        }

        if index > 0 {
            let previous = &messages[index - 1].payload;
            let legal = matches!(
                (previous, &message.payload),
                (
                    MessagePayload::User { .. },
                    MessagePayload::AgentReply { .. } | MessagePayload::AgentToolCall { .. }
                ) | (
                    MessagePayload::AgentToolCall { .. },
                    MessagePayload::ToolResult { .. }
                ) | (
                    MessagePayload::ToolResult { .. },
                    MessagePayload::AgentReply { .. } | MessagePayload::AgentToolCall { .. }
                ) | (MessagePayload::AgentReply { .. }, MessagePayload::User { .. })
            );
            if !legal {
                return Err(TranscriptError::UnexpectedSuccessor {
                    index,
                    previous: previous.kind(),
                    found: message.payload.kind(),
                });
            }
        }

        match &message.payload {
            MessagePayload::User { .. } => {
                user_turns += 1;
                if message.turn_index != user_turns {
                    return Err(TranscriptError::TurnIndex {
                        index,
                        expected: user_turns,
                        found: message.turn_index,
                    });
                }
            }
            MessagePayload::AgentToolCall { call, .. } => {
                pending_call = Some(call.call_id.as_str());
            }
            MessagePayload::ToolResult { result } => {
                let expected = pending_call.take().unwrap_or_default();
                if result.call_id != expected {
                    return Err(TranscriptError::CallIdMismatch {
                        index,
                        expected: expected.to_string(),
                        got: result.call_id.clone(),
                    });
                }
            }
            MessagePayload::AgentReply { .. } => {}
        }

        if !matches!(message.payload, MessagePayload::User { .. })
            && message.turn_index != user_turns
        {
            return Err(TranscriptError::TurnIndex {
                index,
                expected: user_turns,
                found: message.turn_index,
            });
        }
    }

    if pending_call.is_some() {
        return Err(TranscriptError::DanglingToolCall {
            termination: trajectory.termination,
        });
    }

    if trajectory.termination == TerminationReason::GoalReached
        && messages.last().map(|m| m.role) != Some(Role::User)
    {
        return Err(TranscriptError::GoalWithoutUserMessage);
    }

    if trajectory.turn_count != user_turns {
        return Err(TranscriptError::TurnCount {
            recorded: trajectory.turn_count,
            actual: user_turns,
        });
    }

    if let Some(budget) = max_turns {
        if user_turns > budget {
            return Err(TranscriptError::TurnBudgetExceeded {
                budget,
                actual: user_turns,
            });
        }
    }

    Ok(())
}
