//! Resolved agent configuration
//!
//! The core never reads files; callers resolve their configuration source
//! into an [`AgentConfig`] and hand it to the orchestrator.

use serde::{Deserialize, Serialize};

use crate::backend::GenerationOptions;
use crate::error::{AgentError, Result};
use crate::session::SessionConfig;

/// Default bound on consecutive tool calls within one turn
pub const DEFAULT_LOOP_DEPTH_LIMIT: usize = 10;

const fn default_loop_depth_limit() -> usize {
    DEFAULT_LOOP_DEPTH_LIMIT
}

/// Everything one agent needs to run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Key the agent was selected by
    pub agent_id: String,

    /// Display name used to prefix replies
    pub name: String,

    /// Model identifier passed to the backend
    pub model_name: String,

    /// Tool providers, in registration (and precedence) order
    #[serde(default)]
    pub tool_names: Vec<String>,

    /// Connection parameters of each provider in `tool_names`
    #[serde(default)]
    pub connection_params: Vec<SessionConfig>,

    /// Maximum tool calls per turn
    #[serde(default = "default_loop_depth_limit")]
    pub loop_depth_limit: usize,

    /// Sampling options; `model` is overridden by `model_name`
    #[serde(default)]
    pub generation: GenerationOptions,

    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl AgentConfig {
    pub fn new(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            model_name: model_name.into(),
            tool_names: Vec::new(),
            connection_params: Vec::new(),
            loop_depth_limit: DEFAULT_LOOP_DEPTH_LIMIT,
            generation: GenerationOptions::default(),
            system_prompt: None,
        }
    }

    /// Add a tool provider after the ones already configured
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.tool_names.push(session.id.to_string());
        self.connection_params.push(session);
        self
    }

    #[must_use]
    pub const fn with_loop_depth_limit(mut self, limit: usize) -> Self {
        self.loop_depth_limit = limit;
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Check internal consistency; every failure is a configuration error
    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(AgentError::Config(format!(
                "Agent '{}' has no model name",
                self.agent_id
            )));
        }
        if self.loop_depth_limit == 0 {
            return Err(AgentError::Config(format!(
                "Agent '{}' must allow at least one tool call per turn",
                self.agent_id
            )));
        }
        for (position, name) in self.tool_names.iter().enumerate() {
            if self.tool_names[..position].contains(name) {
                return Err(AgentError::Config(format!("Tool provider '{name}' is listed twice")));
            }
            if !self.connection_params.iter().any(|c| c.id.as_str() == name) {
                return Err(AgentError::Config(format!(
                    "Tool provider '{name}' has no connection parameters"
                )));
            }
        }
        Ok(())
    }

    /// Session configs in `tool_names` order
    pub fn sessions(&self) -> Vec<SessionConfig> {
        self.tool_names
            .iter()
            .filter_map(|name| {
                self.connection_params
                    .iter()
                    .find(|config| config.id.as_str() == name)
                    .cloned()
            })
            .collect()
    }

    /// Generation options with the model and system prompt applied
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.model_name.clone(),
            system_prompt: self
                .system_prompt
                .clone()
                .or_else(|| self.generation.system_prompt.clone()),
            ..self.generation.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionParams;

    fn builtin(id: &str) -> SessionConfig {
        SessionConfig::new(id, ConnectionParams::Builtin { builtin: vec![] })
    }

    #[test]
    fn test_defaults_from_json() {
        let config: AgentConfig = serde_json::from_value(serde_json::json!({
            "agent_id": "chat",
            "name": "Chat",
            "model_name": "llama3.2"
        }))
        .unwrap();
        assert_eq!(config.loop_depth_limit, DEFAULT_LOOP_DEPTH_LIMIT);
        assert!(config.tool_names.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_inconsistent_config() {
        let zero = AgentConfig::new("chat", "Chat", "m").with_loop_depth_limit(0);
        assert!(matches!(zero.validate(), Err(AgentError::Config(_))));

        let mut dangling = AgentConfig::new("chat", "Chat", "m");
        dangling.tool_names.push("ghost".into());
        assert!(matches!(dangling.validate(), Err(AgentError::Config(_))));

        let twice = AgentConfig::new("chat", "Chat", "m")
            .with_session(builtin("local"))
            .with_session(builtin("local"));
        assert!(matches!(twice.validate(), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_sessions_follow_tool_order() {
        let mut config = AgentConfig::new("chat", "Chat", "m");
        config.connection_params = vec![builtin("b"), builtin("a")];
        config.tool_names = vec!["a".into(), "b".into()];

        let ids: Vec<_> = config.sessions().into_iter().map(|s| s.id.to_string()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_generation_options_use_model_name() {
        let config = AgentConfig::new("chat", "Chat", "qwen2.5").with_system_prompt("Be brief.");
        let options = config.generation_options();
        assert_eq!(options.model, "qwen2.5");
        assert_eq!(options.system_prompt.as_deref(), Some("Be brief."));
    }
}
