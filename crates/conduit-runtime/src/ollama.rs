//! Ollama LLM Backend
//!
//! Implementation of `LlmBackend` for local Ollama inference. Tool calling
//! uses a text protocol: the tool definitions are described in a system
//! message and the model answers a tool call with a fenced block
//!
//! ````text
//! ```tool
//! {"tool": "list_files", "arguments": {"directory_path": "/tmp"}}
//! ```
//! ````
//!
//! or a bare JSON object with a `"tool"` key, possibly after some prose.
//! When tools are offered the whole reply is read before deciding; without
//! tools it is streamed through as plain text.

use async_trait::async_trait;
use conduit_core::{
    backend::{BackendToolDef, Completion, GenerationOptions, LlmBackend, TextStream},
    error::{AgentError, Result},
    message::{FileSource, Part, Role, Turn},
    tool::{ToolInvocation, ToolOutcome},
};
use futures::{Stream, StreamExt};
use ollama_rs::{
    Ollama,
    generation::chat::{ChatMessage, MessageRole, request::ChatMessageRequest},
    models::ModelOptions,
};
use serde::Deserialize;

const TOOL_FENCE: &str = "```tool";

/// Ollama backend configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self { host, port }
    }
}

/// Ollama LLM backend
pub struct OllamaBackend {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaBackend {
    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Self {
        Self {
            client: Ollama::new(&config.host, config.port),
            config,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Self {
        Self::from_config(OllamaConfig::default())
    }

    pub const fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Convert History into Ollama chat messages
    fn convert_history(
        history: &[Turn],
        options: &GenerationOptions,
        tools: &[BackendToolDef],
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);

        let mut system = options.system_prompt.clone().unwrap_or_default();
        if !tools.is_empty() {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&tool_instructions(tools));
        }
        if !system.is_empty() {
            messages.push(ChatMessage::new(MessageRole::System, system));
        }

        for turn in history {
            if turn.is_tool_result() {
                let meta = turn.metadata();
                let name = meta.tool_name.clone().unwrap_or_default();
                let call = serde_json::json!({
                    "tool": name,
                    "arguments": meta.tool_arguments.clone().unwrap_or_default(),
                });
                messages.push(ChatMessage::new(
                    MessageRole::Assistant,
                    format!("{TOOL_FENCE}\n{call}\n```"),
                ));
                // Tools appear as user context
                messages.push(ChatMessage::new(MessageRole::User, render_tool_result(turn, &name)));
                continue;
            }

            let role = match turn.role() {
                Role::User => MessageRole::User,
                Role::Agent => MessageRole::Assistant,
            };
            messages.push(ChatMessage::new(role, render_parts(turn.parts())));
        }

        messages
    }

    /// Build Ollama generation options
    fn build_options(opts: &GenerationOptions) -> ModelOptions {
        ModelOptions::default()
            .temperature(opts.temperature)
            .top_p(opts.top_p)
            .num_predict(i32::try_from(opts.max_tokens).unwrap_or(i32::MAX))
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn initialize(&self) -> Result<()> {
        match self.client.list_local_models().await {
            Ok(models) => {
                tracing::info!(
                    host = %self.config.host,
                    port = self.config.port,
                    models = models.len(),
                    "Ollama reachable"
                );
                Ok(())
            }
            Err(e) => Err(AgentError::Backend(format!(
                "Ollama unreachable at {}:{}: {e:?}",
                self.config.host, self.config.port
            ))),
        }
    }

    async fn post(
        &self,
        history: &[Turn],
        options: &GenerationOptions,
        tools: &[BackendToolDef],
    ) -> Result<Completion> {
        let request = ChatMessageRequest::new(
            options.model.clone(),
            Self::convert_history(history, options, tools),
        )
        .options(Self::build_options(options));

        let stream = self
            .client
            .send_chat_messages_stream(request)
            .await
            .map_err(|e| AgentError::Backend(format!("{e:?}")))?;

        let chunks = stream.map(|item| {
            item.map(|response| response.message.content)
                .map_err(|e| AgentError::Backend(format!("stream error: {e:?}")))
        });

        if tools.is_empty() {
            return Ok(Completion::Text(Box::pin(chunks)));
        }
        split_completion(Box::pin(chunks)).await
    }
}

/// System message describing the text tool protocol
fn tool_instructions(tools: &[BackendToolDef]) -> String {
    let mut section = String::from(
        "You can call tools. To call one, reply with ONLY a JSON block in this exact format:\n\
         ```tool\n{\"tool\": \"tool_name\", \"arguments\": {\"arg1\": \"value1\"}}\n```\n\
         Call at most one tool per reply. After receiving the result, answer the user \
         or call another tool. If you can answer directly, do so.\n\nAvailable tools:\n",
    );
    for tool in tools {
        section.push_str(&format!(
            "- {}: {}\n  parameters: {}\n",
            tool.name, tool.description, tool.parameters
        ));
    }
    section
}

fn render_parts(parts: &[Part]) -> String {
    parts
        .iter()
        .map(|part| match part {
            Part::Text { text } => text.clone(),
            Part::File {
                name,
                mime_type,
                source,
            } => {
                let label = name.as_deref().unwrap_or("file");
                let location = match source {
                    FileSource::Uri(uri) => uri.as_str(),
                    FileSource::Bytes(_) => "inline data",
                };
                format!("[{label} ({mime_type}) at {location}]")
            }
            Part::Data { data } => data.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_tool_result(turn: &Turn, name: &str) -> String {
    let body = turn
        .parts()
        .iter()
        .find_map(|part| match part {
            Part::Data { data } => Some(data.get("payload").unwrap_or(data).to_string()),
            _ => None,
        })
        .unwrap_or_default();

    if turn.tool_outcome() == Some(ToolOutcome::Success) {
        format!("[Tool '{name}' returned]\n{body}")
    } else {
        format!("[Tool '{name}' failed]\n{body}")
    }
}

/// Read a whole reply and decide between text and a single tool call
async fn split_completion<S>(mut chunks: S) -> Result<Completion>
where
    S: Stream<Item = Result<String>> + Send + Unpin,
{
    let mut buffer = String::new();
    while let Some(chunk) = chunks.next().await {
        buffer.push_str(&chunk?);
    }

    Ok(match parse_tool_call(&buffer) {
        Some(call) => {
            tracing::debug!(tool = %call.name, "Model requested a tool");
            Completion::ToolCall(call)
        }
        None => Completion::Text(single(buffer)),
    })
}

fn single(text: String) -> TextStream {
    Box::pin(futures::stream::once(async move { Ok(text) }))
}

#[derive(Deserialize)]
struct RawToolCall {
    tool: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Extract a single tool call from a reply
fn parse_tool_call(content: &str) -> Option<ToolInvocation> {
    let fenced = content.find(TOOL_FENCE).and_then(|start| {
        let after = &content[start + TOOL_FENCE.len()..];
        let end = after.find("```")?;
        serde_json::from_str::<RawToolCall>(after[..end].trim()).ok()
    });

    let raw = fenced.or_else(|| {
        if !content.contains(r#""tool""#) {
            return None;
        }
        let start = content.find('{')?;
        let end = content.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str::<RawToolCall>(&content[start..=end]).ok()
    })?;

    let arguments = match raw.arguments {
        serde_json::Value::Null => serde_json::json!({}),
        other => other,
    };
    Some(ToolInvocation::new(raw.tool, arguments))
}
