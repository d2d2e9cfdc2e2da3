//! JSONL storage for trajectories, scores and training records.
//!
//! One record per line. Appends are idempotent per trajectory id: the
//! writer loads the ids already present in a file and skips records it has
//! seen, so a rerun never duplicates output.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{MessagePayload, Trajectory};

/// Errors that can occur during trajectory storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid record at {path}:{line}: {message}")]
    InvalidData {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads every record of a JSONL file. Blank lines are skipped.
pub async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StorageError> {
    let contents = fs::read_to_string(path).await.map_err(io_err(path))?;
    let mut records = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| StorageError::InvalidData {
            path: path.to_path_buf(),
            line: i + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Trajectory ids already present in a JSONL file.
///
/// A missing file yields an empty set. Lines without a parseable
/// `id`/`trajectory_id` field are ignored with a warning.
pub async fn existing_ids(path: &Path) -> Result<HashSet<Uuid>, StorageError> {
    let contents = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(io_err(path)(e)),
    };

    let mut ids = HashSet::new();
    for (i, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let id = serde_json::from_str::<Value>(line).ok().and_then(|v| {
            v.get("trajectory_id")
                .or_else(|| v.get("id"))
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
        });
        match id {
            Some(id) => {
                ids.insert(id);
            }
            None => warn!(path = %path.display(), line = i + 1, "Skipping record without id"),
        }
    }
    Ok(ids)
}

/// Append-only JSONL writer keyed by trajectory id.
pub struct CorpusWriter {
    path: PathBuf,
    seen: HashSet<Uuid>,
    written: usize,
}

impl CorpusWriter {
    /// Opens a writer, loading the ids already present in `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }
        let seen = existing_ids(&path).await?;
        debug!(path = %path.display(), existing = seen.len(), "Opened corpus file");
        Ok(Self {
            path,
            seen,
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.seen.contains(id)
    }

    /// Ids present in the file, written in this session or before.
    pub fn ids(&self) -> &HashSet<Uuid> {
        &self.seen
    }

    /// Records appended by this writer.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Appends records whose id is not already in the file.
    ///
    /// Returns the number of records actually written.
    pub async fn append<T, F>(&mut self, records: &[T], id_of: F) -> Result<usize, StorageError>
    where
        T: Serialize,
        F: Fn(&T) -> Uuid,
    {
        let mut buffer = String::new();
        let mut count = 0;
        for record in records {
            let id = id_of(record);
            if !self.seen.insert(id) {
                continue;
            }
            buffer.push_str(&serde_json::to_string(record)?);
            buffer.push('\n');
            count += 1;
        }
        if count == 0 {
            return Ok(0);
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err(&self.path))?;
        file.write_all(buffer.as_bytes())
            .await
            .map_err(io_err(&self.path))?;
        file.sync_all().await.map_err(io_err(&self.path))?;

        self.written += count;
        Ok(count)
    }
}

/// One message in the training export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMessage {
    /// `user`, `assistant` or `execution`.
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub quality_tags: Vec<String>,
    pub is_high_quality: bool,
    pub termination: String,
    pub persona_id: String,
    pub turn_count: u32,
}

/// Training-format view of a retained trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub trajectory_id: Uuid,
    pub task_id: String,
    pub agent_id: String,
    pub messages: Vec<TrainingMessage>,
    pub score: Option<f64>,
    pub metadata: TrainingMetadata,
}

impl TrainingRecord {
    pub fn from_trajectory(
        trajectory: &Trajectory,
        score: Option<f64>,
        quality_tags: Vec<String>,
        is_high_quality: bool,
    ) -> Self {
        let messages = trajectory
            .messages
            .iter()
            .map(|m| match &m.payload {
                MessagePayload::User { content } => TrainingMessage {
                    role: "user".into(),
                    content: content.clone(),
                    tool_call: None,
                },
                MessagePayload::AgentReply { content } => TrainingMessage {
                    role: "assistant".into(),
                    content: content.clone(),
                    tool_call: None,
                },
                MessagePayload::AgentToolCall { content, call } => TrainingMessage {
                    role: "assistant".into(),
                    content: content.clone(),
                    tool_call: Some(serde_json::json!({
                        "name": call.name,
                        "arguments": call.arguments,
                    })),
                },
                MessagePayload::ToolResult { result } => TrainingMessage {
                    role: "execution".into(),
                    content: result.observation(),
                    tool_call: None,
                },
            })
            .collect();

        Self {
            trajectory_id: trajectory.id,
            task_id: trajectory.task_id.clone(),
            agent_id: trajectory.agent_id.clone(),
            messages,
            score,
            metadata: TrainingMetadata {
                quality_tags,
                is_high_quality,
                termination: trajectory.termination.to_string(),
                persona_id: trajectory.persona_id.clone(),
                turn_count: trajectory.turn_count,
            },
        }
    }
}

/// Replaces `path` with one line per record.
///
/// Used for derived views that are rebuilt from scratch on every run.
pub async fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(io_err(parent))?;
    }
    let mut buffer = String::new();
    for record in records {
        buffer.push_str(&serde_json::to_string(record)?);
        buffer.push('\n');
    }
    fs::write(path, buffer).await.map_err(io_err(path))
}

/// Writes a pretty-printed JSON document, creating parent directories.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(io_err(parent))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).await.map_err(io_err(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::types::{
        Message, TerminationReason, TokenUsage, ToolCall, ToolOutcome, ToolResult,
    };
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn sample(task: &str) -> Trajectory {
        let call = ToolCall {
            call_id: "call-1".into(),
            name: "lookup".into(),
            arguments: json!({"id": 1}),
        };
        Trajectory {
            id: Trajectory::derive_id(task, "agent", 0),
            task_id: task.into(),
            agent_id: "agent".into(),
            persona_id: "p1".into(),
            attempt: 0,
            messages: vec![
                Message::user(1, "look it up"),
                Message::agent_tool_call(1, "calling", call),
                Message::tool_result(
                    1,
                    ToolResult {
                        call_id: "call-1".into(),
                        tool_name: "lookup".into(),
                        outcome: ToolOutcome::Success,
                        payload: json!({"found": true}),
                        error: None,
                    },
                ),
                Message::agent_reply(1, "found"),
                Message::user(2, "finish conversation"),
            ],
            termination: TerminationReason::GoalReached,
            termination_detail: None,
            turn_count: 2,
            tool_call_count: 1,
            tool_usage: BTreeMap::from([("lookup".to_string(), 1)]),
            token_usage: TokenUsage::default(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_skips_existing_ids() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("out/trajectories.jsonl");

        let mut writer = CorpusWriter::open(&path).await.expect("open");
        let first = vec![sample("a"), sample("b")];
        assert_eq!(writer.append(&first, |t| t.id).await.expect("append"), 2);

        // A fresh writer sees what the previous run wrote.
        let mut writer = CorpusWriter::open(&path).await.expect("reopen");
        assert!(writer.contains(&Trajectory::derive_id("a", "agent", 0)));
        let second = vec![sample("b"), sample("c")];
        assert_eq!(writer.append(&second, |t| t.id).await.expect("append"), 1);

        let stored: Vec<Trajectory> = read_jsonl(&path).await.expect("read");
        let tasks: Vec<_> = stored.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(tasks, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_existing_ids_on_missing_file() {
        let dir = TempDir::new().expect("tempdir");
        let ids = existing_ids(&dir.path().join("nope.jsonl"))
            .await
            .expect("missing file is empty");
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_read_jsonl_reports_bad_line() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "{\"a\":1}\n\nnot json\n")
            .await
            .expect("write");
        let err = read_jsonl::<Value>(&path).await.expect_err("line 3 is bad");
        assert!(matches!(err, StorageError::InvalidData { line: 3, .. }));
    }

    #[test]
    fn test_training_record_roles() {
        let record = TrainingRecord::from_trajectory(
            &sample("a"),
            Some(4.6),
            vec!["passed".into(), "high_quality".into()],
            true,
        );
        let roles: Vec<_> = record.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(
            roles,
            vec!["user", "assistant", "execution", "assistant", "user"]
        );
        assert_eq!(record.messages[1].tool_call.as_ref().expect("call")["name"], "lookup");
        assert!(record.metadata.is_high_quality);
        assert_eq!(record.metadata.termination, "goal_reached");
    }
}
