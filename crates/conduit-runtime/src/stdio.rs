//! MCP tool session over a child process's stdio
//!
//! Spawns the configured command, performs the MCP initialize handshake and
//! then serves `tools/list` and `tools/call` through the running rmcp client.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use conduit_core::error::{AgentError, Result};
use conduit_core::session::{SessionId, ToolSession};
use conduit_core::tool::{ToolDescriptor, ToolResult};
use rmcp::model::{CallToolRequestParams, CallToolResult, ClientInfo, JsonObject, ProtocolVersion};
use rmcp::service::{DynService, RoleClient, RunningService, ServiceExt};
use rmcp::transport::TokioChildProcess;
use tokio::process::Command;

type ClientService = RunningService<RoleClient, Box<dyn DynService<RoleClient>>>;

/// Tool session backed by an MCP server process
pub struct StdioSession {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    service: Option<ClientService>,
}

impl StdioSession {
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<PathBuf>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            cwd,
            service: None,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn build_command(&self) -> Command {
        let mut command = Command::new(&self.command);
        command.args(&self.args).envs(&self.env);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }

    fn service(&self, tool: &str) -> Result<&ClientService> {
        self.service.as_ref().ok_or_else(|| AgentError::ToolInvocation {
            tool: tool.to_string(),
            message: format!("MCP server '{}' is not connected", self.command),
        })
    }
}

#[async_trait]
impl ToolSession for StdioSession {
    async fn connect(&mut self) -> Result<()> {
        if self.service.is_some() {
            return Ok(());
        }

        let transport = TokioChildProcess::new(self.build_command()).map_err(|e| {
            AgentError::Other(format!("failed to spawn '{}': {e}", self.command))
        })?;
        let client_info = ClientInfo {
            protocol_version: ProtocolVersion::LATEST,
            ..Default::default()
        };
        let service = client_info
            .into_dyn()
            .serve(transport)
            .await
            .map_err(|e| AgentError::Other(format!("MCP initialize failed: {e}")))?;

        tracing::info!(command = %self.command, "MCP server connected");
        self.service = Some(service);
        Ok(())
    }

    async fn list_tools(&self, owner: &SessionId) -> Result<Vec<ToolDescriptor>> {
        let service = self
            .service
            .as_ref()
            .ok_or_else(|| AgentError::Other(format!("MCP server '{owner}' is not connected")))?;
        let tools = service
            .list_all_tools()
            .await
            .map_err(|e| AgentError::Other(format!("tools/list failed: {e}")))?;

        Ok(tools
            .into_iter()
            .map(|tool| {
                ToolDescriptor::new(
                    tool.name.to_string(),
                    tool.description.map(|d| d.to_string()).unwrap_or_default(),
                    serde_json::Value::Object((*tool.input_schema).clone()),
                    owner.clone(),
                )
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolResult> {
        let arguments = coerce_arguments(name, arguments)?;
        let result = self
            .service(name)?
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments,
                task: None,
            })
            .await
            .map_err(|e| AgentError::ToolInvocation {
                tool: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(into_tool_result(result))
    }

    async fn close(&mut self) -> Result<()> {
        let Some(service) = self.service.take() else {
            return Ok(());
        };
        service
            .cancel()
            .await
            .map_err(|e| AgentError::Other(format!("MCP server shutdown failed: {e}")))?;
        tracing::debug!(command = %self.command, "MCP server stopped");
        Ok(())
    }
}

fn coerce_arguments(tool: &str, arguments: serde_json::Value) -> Result<Option<JsonObject>> {
    match arguments {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        other => Err(AgentError::ToolInvocation {
            tool: tool.to_string(),
            message: format!("arguments must be a JSON object, got {other}"),
        }),
    }
}

/// Prefer structured content, then joined text content, then the raw content list
fn into_tool_result(result: CallToolResult) -> ToolResult {
    let text: Vec<String> = result
        .content
        .iter()
        .filter_map(|item| item.as_text().map(|t| t.text.clone()))
        .collect();

    let payload = match result.structured_content {
        Some(structured) => structured,
        None if !text.is_empty() => serde_json::Value::String(text.join("\n")),
        None => serde_json::Value::Array(
            result
                .content
                .iter()
                .filter_map(|item| serde_json::to_value(item).ok())
                .collect(),
        ),
    };

    if result.is_error.unwrap_or(false) {
        ToolResult::error(serde_json::json!({ "error": payload }))
    } else {
        ToolResult::success(payload)
    }
}
