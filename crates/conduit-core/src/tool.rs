//! Tool System
//!
//! Catalog entries, invocations and results exchanged between the model,
//! the multiplexer and tool-provider sessions. In-process tools implement
//! [`Tool`] and are served through a [`ToolRegistry`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::session::SessionId;

/// One entry of the aggregated tool catalog
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Name the model uses to call the tool (unique within the catalog)
    pub name: String,

    /// Human-readable description (shown to the model)
    #[serde(default)]
    pub description: String,

    /// JSON Schema of the arguments object
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,

    /// Session that serves this tool; a lookup key, not ownership
    pub session: SessionId,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        session: SessionId,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            session,
        }
    }
}

/// Tool call request from the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool identifier
    pub name: String,

    /// Arguments object
    #[serde(default)]
    pub arguments: serde_json::Value,

    /// Id linking the call to its result turn
    #[serde(default = "new_correlation_id")]
    pub correlation_id: String,
}

fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ToolInvocation {
    /// Create an invocation with a fresh correlation id
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            correlation_id: new_correlation_id(),
        }
    }
}

/// Whether a tool call succeeded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutcome {
    Success,
    Error,
}

/// Result from tool execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub outcome: ToolOutcome,
    pub payload: serde_json::Value,
}

impl ToolResult {
    pub const fn success(payload: serde_json::Value) -> Self {
        Self {
            outcome: ToolOutcome::Success,
            payload,
        }
    }

    pub const fn error(payload: serde_json::Value) -> Self {
        Self {
            outcome: ToolOutcome::Error,
            payload,
        }
    }

    /// Error result carrying only a message
    pub fn failure(message: impl Into<String>) -> Self {
        Self::error(serde_json::json!({ "error": message.into() }))
    }

    /// Error result describing a failed resolution or call
    pub fn from_error(err: &AgentError) -> Self {
        Self::failure(err.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ToolOutcome::Success
    }
}

/// Parameter definition for in-process tool schemas
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
}

impl ParameterSchema {
    pub fn required(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

/// Schema of an in-process tool
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to the model)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSchema {
    /// Render the parameters as a JSON Schema object
    pub fn input_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut prop = serde_json::Map::new();
            prop.insert("type".into(), param.param_type.clone().into());
            prop.insert("description".into(), param.description.clone().into());
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            if let Some(values) = &param.enum_values {
                prop.insert("enum".into(), values.clone().into());
            }
            properties.insert(param.name.clone(), prop.into());
            if param.required {
                required.push(serde_json::Value::from(param.name.clone()));
            }
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Convert into a catalog descriptor owned by `session`
    pub fn into_descriptor(self, session: SessionId) -> ToolDescriptor {
        let input_schema = self.input_schema();
        ToolDescriptor {
            name: self.name,
            description: self.description,
            input_schema,
            session,
        }
    }
}

/// In-process tool - implement to add new capabilities to a local session
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with given arguments
    async fn execute(&self, arguments: &serde_json::Value) -> Result<ToolResult>;

    /// Validate arguments before execution
    fn validate(&self, arguments: &serde_json::Value) -> Result<()> {
        let schema = self.schema();
        let object = match arguments {
            serde_json::Value::Object(map) => Some(map),
            serde_json::Value::Null => None,
            other => {
                return Err(AgentError::ToolInvocation {
                    tool: schema.name,
                    message: format!("arguments must be an object, got {other}"),
                });
            }
        };

        for param in &schema.parameters {
            let present = object.is_some_and(|map| map.contains_key(&param.name));
            if param.required && !present {
                return Err(AgentError::ToolInvocation {
                    tool: schema.name.clone(),
                    message: format!("Missing required parameter: {}", param.name),
                });
            }
        }

        Ok(())
    }
}

/// Name-indexed set of in-process tools, in registration order
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_boxed(Arc::new(tool));
    }

    /// Register a shared tool; a later tool with the same name replaces it
    pub fn register_boxed(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.schema().name;
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Validate and execute a call
    pub async fn execute(&self, name: &str, arguments: &serde_json::Value) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        tool.validate(arguments)?;
        tool.execute(arguments).await
    }

    /// Tool schemas in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.schema())
            .collect()
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo".into(),
                description: "Echo the message back".into(),
                parameters: vec![ParameterSchema::required(
                    "message",
                    "string",
                    "Text to echo",
                )],
            }
        }

        async fn execute(&self, arguments: &serde_json::Value) -> Result<ToolResult> {
            Ok(ToolResult::success(arguments["message"].clone()))
        }
    }

    #[test]
    fn test_input_schema_lists_required() {
        let schema = EchoTool.schema().input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["message"]["type"], "string");
        assert_eq!(schema["required"], json!(["message"]));
    }

    #[tokio::test]
    async fn test_registry_validates_before_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let ok = registry.execute("echo", &json!({"message": "hi"})).await.unwrap();
        assert_eq!(ok.payload, json!("hi"));

        let missing = registry.execute("echo", &json!({})).await;
        assert!(matches!(missing, Err(AgentError::ToolInvocation { .. })));

        let unknown = registry.execute("nope", &json!({})).await;
        assert!(matches!(unknown, Err(AgentError::ToolNotFound(_))));
    }

    #[test]
    fn test_invocations_get_distinct_ids() {
        let a = ToolInvocation::new("x", json!({}));
        let b = ToolInvocation::new("x", json!({}));
        assert_ne!(a.correlation_id, b.correlation_id);
        assert!(ToolResult::failure("boom").payload["error"] == "boom");
    }
}
