//! Trajectory data model, transcript validation and corpus storage.
//!
//! A [`Trajectory`] is the unit of output: one simulated conversation
//! between a synthetic user and a tool-using agent, recorded as an ordered,
//! append-only list of [`Message`]s and closed by exactly one
//! [`TerminationReason`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use trajforge::trajectory::{validate_transcript, CorpusWriter, TrainingRecord};
//!
//! validate_transcript(&trajectory, Some(config.max_turns))?;
//!
//! let mut writer = CorpusWriter::open("out/trajectories.jsonl").await?;
//! writer.append(&[trajectory], |t| t.id).await?;
//! ```

pub mod records;
pub mod storage;
pub mod types;
pub mod validation;

pub use records::{
    AgentConfig, AgentRecord, Criterion, Difficulty, InteractionStyle, Personality, Rubric, Task,
    ToolDefinition, ToolParameter, UserPersona,
};
pub use storage::{
    existing_ids, read_jsonl, write_json, write_jsonl, CorpusWriter, StorageError, TrainingMessage,
    TrainingMetadata, TrainingRecord,
};
pub use types::{
    Message, MessagePayload, Role, TerminationReason, TokenUsage, ToolCall, ToolErrorPayload,
    ToolOutcome, ToolResult, Trajectory,
};
pub use validation::{validate_transcript, TranscriptError};
