//! YAML configuration file
//!
//! ```yaml
//! agents:
//!   chat:
//!     name: Chat
//!     model_provider: ollama
//!     model_name: llama3.2
//!     tools: [filesystem, local]
//!     config: { temperature: 0.7 }
//! mcp_servers:
//!   filesystem: { command: npx, args: ["-y", "@modelcontextprotocol/server-filesystem", "."] }
//!   local: { builtin: [datetime, calculate] }
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use conduit_core::backend::GenerationOptions;
use conduit_core::config::{AgentConfig, DEFAULT_LOOP_DEPTH_LIMIT};
use conduit_core::error::{AgentError, Result};
use conduit_core::session::{ConnectionParams, SessionConfig};
use serde::Deserialize;

/// Whole configuration file
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub agents: HashMap<String, AgentEntry>,

    /// Tool providers, keyed by the name agents refer to them with
    #[serde(default)]
    pub mcp_servers: HashMap<String, ConnectionParams>,
}

/// One `agents.<id>` entry
#[derive(Debug, Deserialize)]
pub struct AgentEntry {
    #[serde(default)]
    pub name: Option<String>,
    pub model_provider: String,
    pub model_name: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub config: GenerationSection,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub loop_depth_limit: Option<usize>,
}

/// Sampling overrides; anything unset keeps the backend default
#[derive(Debug, Default, Deserialize)]
pub struct GenerationSection {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

/// Supported model backends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelProvider {
    Ollama,
}

impl std::str::FromStr for ModelProvider {
    type Err = AgentError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            other => Err(AgentError::Config(format!("Unsupported model provider '{other}'"))),
        }
    }
}

/// An agent ready to be built
#[derive(Debug)]
pub struct ResolvedAgent {
    pub provider: ModelProvider,
    pub config: AgentConfig,
}

impl FileConfig {
    /// Read and parse a configuration file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Resolve one agent and the tool providers it names
    pub fn resolve(&self, agent_id: &str) -> Result<ResolvedAgent> {
        let entry = self.agents.get(agent_id).ok_or_else(|| {
            let mut known: Vec<_> = self.agents.keys().map(String::as_str).collect();
            known.sort_unstable();
            AgentError::Config(format!(
                "Unknown agent '{agent_id}' (configured: {})",
                known.join(", ")
            ))
        })?;

        let provider: ModelProvider = entry.model_provider.parse()?;

        let mut connection_params = Vec::with_capacity(entry.tools.len());
        for tool in &entry.tools {
            let params = self.mcp_servers.get(tool).ok_or_else(|| {
                AgentError::Config(format!(
                    "Agent '{agent_id}' uses unknown tool provider '{tool}'"
                ))
            })?;
            let session = SessionConfig::new(tool.clone(), params.clone());
            conduit_runtime::factory::check_params(&session)?;
            connection_params.push(session);
        }

        let defaults = GenerationOptions::default();
        let generation = GenerationOptions {
            model: entry.model_name.clone(),
            temperature: entry.config.temperature.unwrap_or(defaults.temperature),
            max_tokens: entry.config.max_tokens.unwrap_or(defaults.max_tokens),
            top_p: entry.config.top_p.unwrap_or(defaults.top_p),
            stop_sequences: entry.config.stop_sequences.clone(),
            system_prompt: None,
        };

        let config = AgentConfig {
            agent_id: agent_id.to_string(),
            name: entry.name.clone().unwrap_or_else(|| agent_id.to_string()),
            model_name: entry.model_name.clone(),
            tool_names: entry.tools.clone(),
            connection_params,
            loop_depth_limit: entry.loop_depth_limit.unwrap_or(DEFAULT_LOOP_DEPTH_LIMIT),
            generation,
            system_prompt: entry.system_prompt.clone(),
        };
        config.validate()?;

        Ok(ResolvedAgent { provider, config })
    }
}
