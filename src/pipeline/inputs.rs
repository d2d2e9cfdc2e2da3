//! Loading and resolution of upstream task, agent, tool and persona records.
//!
//! Inputs are read-only JSON arrays in one directory:
//!
//! | File | Record |
//! |---|---|
//! | `tools.json` | [`ToolDefinition`] |
//! | `agents.json` | [`AgentRecord`] (tools by id or name) |
//! | `tasks.json` | [`Task`] |
//! | `personas.json` | [`UserPersona`] |
//!
//! Only structural completeness is checked: required fields, unique ids, and
//! references that resolve.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::info;

use crate::coordinator::Rollout;
use crate::error::ConfigError;
use crate::trajectory::{AgentConfig, AgentRecord, Task, ToolDefinition, UserPersona};

pub const TOOLS_FILE: &str = "tools.json";
pub const AGENTS_FILE: &str = "agents.json";
pub const TASKS_FILE: &str = "tasks.json";
pub const PERSONAS_FILE: &str = "personas.json";

/// Resolved, immutable inputs for a run.
#[derive(Debug, Clone, Default)]
pub struct InputBundle {
    pub tasks: Vec<Arc<Task>>,
    pub agents: HashMap<String, Arc<AgentConfig>>,
    pub personas: Vec<Arc<UserPersona>>,
}

fn read_records<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<Vec<T>, ConfigError> {
    let path = dir.join(file);
    let text = std::fs::read_to_string(&path).map_err(|e| {
        ConfigError::InvalidInput(format!("cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&text)
        .map_err(|e| ConfigError::InvalidInput(format!("{}: {e}", path.display())))
}

fn ensure_unique<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ConfigError::InvalidInput(format!(
                "duplicate {kind} id '{id}'"
            )));
        }
    }
    Ok(())
}

impl InputBundle {
    /// Reads the four input files from `dir` and resolves them.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let bundle = Self::resolve(
            read_records(dir, TOOLS_FILE)?,
            read_records(dir, AGENTS_FILE)?,
            read_records(dir, TASKS_FILE)?,
            read_records(dir, PERSONAS_FILE)?,
        )?;
        info!(
            dir = %dir.display(),
            tasks = bundle.tasks.len(),
            agents = bundle.agents.len(),
            personas = bundle.personas.len(),
            "Loaded inputs"
        );
        Ok(bundle)
    }

    /// Checks structure and links agents to their tool definitions.
    pub fn resolve(
        tools: Vec<ToolDefinition>,
        agents: Vec<AgentRecord>,
        tasks: Vec<Task>,
        personas: Vec<UserPersona>,
    ) -> Result<Self, ConfigError> {
        for tool in &tools {
            tool.check_structure()?;
        }
        ensure_unique("tool", tools.iter().map(|t| t.id.as_str()))?;

        let tools: Vec<Arc<ToolDefinition>> = tools.into_iter().map(Arc::new).collect();
        let by_key: HashMap<&str, &Arc<ToolDefinition>> = tools
            .iter()
            .flat_map(|t| [(t.id.as_str(), t), (t.name.as_str(), t)])
            .collect();

        ensure_unique("agent", agents.iter().map(|a| a.id.as_str()))?;
        let mut resolved = HashMap::with_capacity(agents.len());
        for record in agents {
            let mut agent_tools = Vec::with_capacity(record.tools.len());
            for reference in &record.tools {
                let tool = by_key.get(reference.as_str()).ok_or_else(|| {
                    ConfigError::InvalidInput(format!(
                        "agent '{}' references unknown tool '{reference}'",
                        record.id
                    ))
                })?;
                agent_tools.push(Arc::clone(tool));
            }
            ensure_unique(
                &format!("tool name in agent '{}'", record.id),
                agent_tools.iter().map(|t| t.name.as_str()),
            )?;
            let agent = AgentConfig::new(record.id, record.system_prompt, agent_tools);
            agent.check_structure()?;
            resolved.insert(agent.id.clone(), Arc::new(agent));
        }

        ensure_unique("task", tasks.iter().map(|t| t.id.as_str()))?;
        for task in &tasks {
            task.check_structure()?;
            if !resolved.contains_key(&task.agent_id) {
                return Err(ConfigError::InvalidInput(format!(
                    "task '{}' references unknown agent '{}'",
                    task.id, task.agent_id
                )));
            }
        }

        ensure_unique("persona", personas.iter().map(|p| p.id.as_str()))?;
        for persona in &personas {
            persona.check_structure()?;
        }
        if !tasks.is_empty() && personas.is_empty() {
            return Err(ConfigError::InvalidInput(
                "at least one persona is required".to_string(),
            ));
        }

        Ok(Self {
            tasks: tasks.into_iter().map(Arc::new).collect(),
            agents: resolved,
            personas: personas.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn task(&self, id: &str) -> Option<&Arc<Task>> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Every (task, attempt) rollout in a stable order.
    ///
    /// Personas are assigned round-robin over that order.
    pub fn rollouts(&self, attempts_per_task: u32) -> Vec<Rollout> {
        let mut rollouts = Vec::new();
        if self.personas.is_empty() {
            return rollouts;
        }
        for task in &self.tasks {
            let Some(agent) = self.agents.get(&task.agent_id) else {
                continue;
            };
            for attempt in 0..attempts_per_task {
                let persona = &self.personas[rollouts.len() % self.personas.len()];
                rollouts.push(Rollout::new(
                    Arc::clone(task),
                    Arc::clone(agent),
                    Arc::clone(persona),
                    attempt,
                ));
            }
        }
        rollouts
    }
}
