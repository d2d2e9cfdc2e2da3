//! Upstream input records: tasks, agents, tools and personas.
//!
//! These are produced by generation stages outside this crate and are
//! immutable once a run starts. Only their structural completeness is
//! checked here; their domain meaning is taken as given.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ConfigError;

/// Difficulty tier of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Simple,
    #[default]
    Medium,
    Complex,
}

/// One weighted scoring criterion of a rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Identifier the judge must echo back, e.g. `task_completion`.
    pub name: String,
    /// What the judge should look for.
    #[serde(default)]
    pub description: String,
    /// Relative weight. Need not sum to one.
    pub weight: f64,
}

impl Criterion {
    pub fn new(name: impl Into<String>, description: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            weight,
        }
    }
}

/// Ordered list of weighted criteria plus advisory expectations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rubric {
    pub criteria: Vec<Criterion>,
    pub success_criteria: Vec<String>,
    pub tool_usage_expectations: Vec<String>,
}

impl Rubric {
    /// The three-part rubric applied when a task names no criteria.
    pub fn default_criteria() -> Vec<Criterion> {
        vec![
            Criterion::new(
                "task_completion",
                "Did the agent understand the request and complete every required objective?",
                0.4,
            ),
            Criterion::new(
                "tool_usage",
                "Were the right tools chosen, called with accurate parameters, and their results (including failures) handled correctly?",
                0.3,
            ),
            Criterion::new(
                "interaction_quality",
                "Was the communication natural, did the agent ask for missing information, and keep context throughout?",
                0.3,
            ),
        ]
    }

    /// Criteria to score against, falling back to the default rubric.
    pub fn effective_criteria(&self) -> Vec<Criterion> {
        if self.criteria.is_empty() {
            Self::default_criteria()
        } else {
            self.criteria.clone()
        }
    }
}

/// A task the simulated user tries to get done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Agent the task was designed for.
    pub agent_id: String,
    #[serde(default)]
    pub title: String,
    /// Goal description handed to the user simulator.
    pub description: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Advisory only; never enforced.
    #[serde(default)]
    pub expected_tools: Vec<String>,
    #[serde(default)]
    pub rubric: Rubric,
}

impl Task {
    /// Checks that required fields are present.
    pub fn check_structure(&self) -> Result<(), ConfigError> {
        require_non_empty("task", "id", &self.id, &self.id)?;
        require_non_empty("task", "agent_id", &self.id, &self.agent_id)?;
        require_non_empty("task", "description", &self.id, &self.description)?;
        for criterion in &self.rubric.criteria {
            require_non_empty("task", "rubric criterion name", &self.id, &criterion.name)?;
            if !criterion.weight.is_finite() || criterion.weight < 0.0 {
                return Err(ConfigError::InvalidInput(format!(
                    "task '{}': criterion '{}' has invalid weight {}",
                    self.id, criterion.name, criterion.weight
                )));
            }
        }
        if !self.rubric.criteria.is_empty()
            && self.rubric.criteria.iter().map(|c| c.weight).sum::<f64>() <= 0.0
        {
            return Err(ConfigError::InvalidInput(format!(
                "task '{}': rubric weights sum to zero",
                self.id
            )));
        }
        Ok(())
    }
}

/// One parameter of a tool's call schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    /// JSON schema scalar type: string, integer, number, boolean, array, object.
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_required() -> bool {
    true
}

impl ToolParameter {
    /// Whether `value` has this parameter's declared JSON type.
    ///
    /// Unknown type names accept anything.
    pub fn accepts(&self, value: &Value) -> bool {
        match self.param_type.as_str() {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" | "float" => value.is_number(),
            "boolean" | "bool" => value.is_boolean(),
            "array" | "list" => value.is_array(),
            "object" | "dict" => value.is_object(),
            _ => true,
        }
    }
}

/// A tool an agent may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
    /// Example invocations and results, used as few-shot context.
    #[serde(default)]
    pub examples: Vec<Value>,
}

impl ToolDefinition {
    /// Function-calling schema in the OpenAI shape.
    pub fn to_function_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = json!({
                "type": param.param_type,
                "description": param.description,
            });
            if let (Some(values), Some(obj)) = (&param.enum_values, prop.as_object_mut()) {
                obj.insert("enum".to_string(), json!(values));
            }
            properties.insert(param.name.clone(), prop);
            if param.required {
                required.push(param.name.clone());
            }
        }
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }

    pub fn parameter(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn check_structure(&self) -> Result<(), ConfigError> {
        require_non_empty("tool", "id", &self.id, &self.id)?;
        require_non_empty("tool", "name", &self.id, &self.name)?;
        for param in &self.parameters {
            require_non_empty("tool", "parameter name", &self.id, &param.name)?;
            require_non_empty("tool", "parameter type", &self.id, &param.param_type)?;
        }
        Ok(())
    }
}

/// Agent record as stored on disk: tools referenced by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub system_prompt: String,
    pub tools: Vec<String>,
}

/// Resolved agent configuration. Tool definitions are shared by reference.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub id: String,
    pub system_prompt: String,
    pub tools: Vec<Arc<ToolDefinition>>,
}

impl AgentConfig {
    pub fn new(
        id: impl Into<String>,
        system_prompt: impl Into<String>,
        tools: Vec<Arc<ToolDefinition>>,
    ) -> Self {
        Self {
            id: id.into(),
            system_prompt: system_prompt.into(),
            tools,
        }
    }

    /// Looks up a declared tool by its call name.
    pub fn tool(&self, name: &str) -> Option<&Arc<ToolDefinition>> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.tool(name).is_some()
    }

    pub fn check_structure(&self) -> Result<(), ConfigError> {
        require_non_empty("agent", "id", &self.id, &self.id)?;
        if self.tools.is_empty() {
            return Err(ConfigError::InvalidInput(format!(
                "agent '{}' declares no tools",
                self.id
            )));
        }
        Ok(())
    }
}

/// Personality of a simulated user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Personality {
    #[default]
    Friendly,
    Impatient,
    Cautious,
    Curious,
    Casual,
}

impl Personality {
    pub fn description(self) -> &'static str {
        match self {
            Personality::Friendly => {
                "Friendly, enthusiastic, helpful, and displays a positive attitude in communication"
            }
            Personality::Impatient => {
                "Impatient, wants to solve problems quickly, dislikes lengthy explanations"
            }
            Personality::Cautious => {
                "Cautious and careful, double-checks before making decisions, worries about making mistakes"
            }
            Personality::Curious => {
                "Curious, likes to ask questions and explore, interested in new things"
            }
            Personality::Casual => {
                "Casual and relaxed, uses informal language, does not care much about formality"
            }
        }
    }
}

/// Phrasing style of a simulated user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStyle {
    Formal,
    #[default]
    Informal,
    LifeOriented,
}

impl InteractionStyle {
    pub fn description(self) -> &'static str {
        match self {
            InteractionStyle::Formal => {
                "Formal and polite communication style, using precise and proper language"
            }
            InteractionStyle::Informal => {
                "Informal and relaxed communication style, using casual and natural language"
            }
            InteractionStyle::LifeOriented => {
                "Life-oriented communication style, focusing on practicality and ease of understanding"
            }
        }
    }
}

/// Behavioral profile driving the user simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPersona {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "personality_type")]
    pub personality: Personality,
    #[serde(alias = "style_type")]
    pub style: InteractionStyle,
}

impl UserPersona {
    /// Characteristics block rendered into the user prompt.
    pub fn characteristics(&self) -> String {
        format!(
            "**personality**: {}\n**style**: {}",
            self.personality.description(),
            self.style.description()
        )
    }

    pub fn check_structure(&self) -> Result<(), ConfigError> {
        require_non_empty("persona", "id", &self.id, &self.id)
    }
}

impl fmt::Display for UserPersona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}/{:?})", self.id, self.personality, self.style)
    }
}

fn require_non_empty(
    kind: &str,
    field: &str,
    record_id: &str,
    value: &str,
) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        let who = if record_id.is_empty() {
            "<unnamed>"
        } else {
            record_id
        };
        return Err(ConfigError::InvalidInput(format!(
            "{kind} '{who}' is missing required field '{field}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_tool() -> ToolDefinition {
        serde_json::from_value(json!({
            "id": "t1",
            "name": "search_flights",
            "description": "Search flights",
            "parameters": [
                {"name": "origin", "type": "string", "description": "IATA code"},
                {"name": "cabin", "type": "string", "required": false, "enum": ["economy", "business"]},
                {"name": "passengers", "type": "integer"}
            ]
        }))
        .expect("valid tool json")
    }

    #[test]
    fn test_function_schema_shape() {
        let schema = search_tool().to_function_schema();
        assert_eq!(schema["name"], "search_flights");
        assert_eq!(schema["parameters"]["type"], "object");
        assert_eq!(
            schema["parameters"]["required"],
            json!(["origin", "passengers"])
        );
        assert_eq!(
            schema["parameters"]["properties"]["cabin"]["enum"],
            json!(["economy", "business"])
        );
    }

    #[test]
    fn test_parameter_type_check() {
        let tool = search_tool();
        let passengers = tool.parameter("passengers").expect("declared");
        assert!(passengers.accepts(&json!(2)));
        assert!(!passengers.accepts(&json!("two")));
        assert!(!passengers.accepts(&json!(2.5)));
    }

    #[test]
    fn test_default_rubric_applies_when_empty() {
        let criteria = Rubric::default().effective_criteria();
        let names: Vec<_> = criteria.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["task_completion", "tool_usage", "interaction_quality"]
        );
        let total: f64 = criteria.iter().map(|c| c.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_task_structure_rejects_missing_description() {
        let task = Task {
            id: "task-1".into(),
            agent_id: "agent-1".into(),
            title: String::new(),
            description: "   ".into(),
            difficulty: Difficulty::Simple,
            expected_tools: vec![],
            rubric: Rubric::default(),
        };
        let err = task.check_structure().expect_err("description is blank");
        assert!(err.to_string().contains("description"));
    }

    #[test]
    fn test_persona_accepts_legacy_field_names() {
        let persona: UserPersona = serde_json::from_value(json!({
            "id": "p1",
            "name": "Dana",
            "personality_type": "impatient",
            "style_type": "life_oriented"
        }))
        .expect("valid persona");
        assert_eq!(persona.personality, Personality::Impatient);
        assert_eq!(persona.style, InteractionStyle::LifeOriented);
        assert!(persona.characteristics().contains("solve problems quickly"));
    }

    #[test]
    fn test_agent_lookup_by_tool_name() {
        let agent = AgentConfig::new("a1", "You help.", vec![Arc::new(search_tool())]);
        assert!(agent.declares("search_flights"));
        assert!(!agent.declares("book_hotel"));
        assert!(agent.check_structure().is_ok());
    }
}
