//! LLM Backend Strategy Pattern
//!
//! Defines the interface the orchestrator uses to talk to a language model
//! (Ollama, Gemini, OpenAI, ...) without knowing its transport.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conduit_core::backend::{Completion, LlmBackend};
//!
//! let defs = backend.create_tool_defs(&catalog);
//! match backend.post(&history, &options, &defs).await? {
//!     Completion::Text(stream) => { /* forward chunks */ }
//!     Completion::ToolCall(call) => { /* route through the multiplexer */ }
//! }
//! ```

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::message::{FileSource, Part, Role, Turn};
use crate::tool::{ToolDescriptor, ToolInvocation};

/// Configuration for LLM generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "llama3.2", "gemini-2.0-flash")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-p nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,

    /// System prompt (if the backend supports one)
    #[serde(default)]
    pub system_prompt: Option<String>,
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_max_tokens() -> u32 {
    2048
}

const fn default_top_p() -> f32 {
    0.9
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            stop_sequences: Vec::new(),
            system_prompt: None,
        }
    }
}

/// Kind of payload passed to [`LlmBackend::create_content`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    File,
}

/// Tool definition in the shape a backend advertises to its model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendToolDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Lazily produced text chunks
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// What the model answered with
pub enum Completion {
    /// Final answer, streamed
    Text(TextStream),
    /// Exactly one tool call
    ToolCall(ToolInvocation),
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(_) => f.write_str("Completion::Text(..)"),
            Self::ToolCall(call) => f.debug_tuple("Completion::ToolCall").field(call).finish(),
        }
    }
}

/// Strategy trait for LLM backends
///
/// Implement this trait to add support for new model providers. Failures
/// from `post` (or from its stream) are reported as [`AgentError::Backend`].
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Prepare the client (credentials, reachability)
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Build a turn from a text payload or a file path/URI
    fn create_content(&self, payload: &str, kind: ContentKind, role: Role) -> Result<Turn> {
        match kind {
            ContentKind::Text => Ok(Turn::new(role, vec![Part::text(payload)])),
            ContentKind::File => {
                let mime_type = guess_mime_type(payload).ok_or_else(|| {
                    AgentError::Content(format!(
                        "Could not determine MIME type for file: {payload}"
                    ))
                })?;
                let name = Path::new(payload)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
                Ok(Turn::new(
                    role,
                    vec![Part::File {
                        name,
                        mime_type: mime_type.into(),
                        source: FileSource::Uri(payload.into()),
                    }],
                ))
            }
        }
    }

    /// Convert the aggregated catalog into backend tool definitions
    fn create_tool_defs(&self, catalog: &[ToolDescriptor]) -> Vec<BackendToolDef> {
        catalog
            .iter()
            .map(|tool| BackendToolDef {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: sanitize_schema(&tool.input_schema),
            })
            .collect()
    }

    /// Request a completion for `history`
    async fn post(
        &self,
        history: &[Turn],
        options: &GenerationOptions,
        tools: &[BackendToolDef],
    ) -> Result<Completion>;
}

/// Strip keys models reject and collapse nullable unions, recursively.
///
/// `$schema` and `additionalProperties` are dropped at the top level. An
/// `anyOf` containing a `{"type": "null"}` branch becomes its first non-null
/// branch with `nullable: true`, keeping sibling keys such as `description`.
pub fn sanitize_schema(schema: &serde_json::Value) -> serde_json::Value {
    match schema {
        serde_json::Value::Object(map) => {
            let top: serde_json::Map<_, _> = map
                .iter()
                .filter(|(key, _)| !matches!(key.as_str(), "$schema" | "additionalProperties"))
                .map(|(key, value)| (key.clone(), sanitize_value(value)))
                .collect();
            serde_json::Value::Object(top)
        }
        other => sanitize_value(other),
    }
}

fn sanitize_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(collapsed) = collapse_nullable(map) {
                return collapsed;
            }
            serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), sanitize_value(value)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sanitize_value).collect())
        }
        other => other.clone(),
    }
}

fn collapse_nullable(
    map: &serde_json::Map<String, serde_json::Value>,
) -> Option<serde_json::Value> {
    let options = map.get("anyOf")?.as_array()?;
    let is_null = |option: &serde_json::Value| {
        option.get("type").and_then(serde_json::Value::as_str) == Some("null")
    };

    if !options.iter().any(is_null) {
        return None;
    }
    let base = options.iter().find(|option| !is_null(*option))?;

    let mut result = match sanitize_value(base) {
        serde_json::Value::Object(object) => object,
        other => return Some(other),
    };
    result.insert("nullable".into(), serde_json::Value::Bool(true));
    for (key, value) in map {
        if key != "anyOf" && !result.contains_key(key) {
            result.insert(key.clone(), sanitize_value(value));
        }
    }
    Some(serde_json::Value::Object(result))
}

/// Guess a MIME type from a path or URI extension
pub fn guess_mime_type(path: &str) -> Option<&'static str> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let extension = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();

    let mime = match extension.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "js" => "text/javascript",
        "py" => "text/x-python",
        "rs" => "text/x-rust",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(mime)
}
