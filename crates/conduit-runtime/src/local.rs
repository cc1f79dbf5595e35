//! In-process tool session

use async_trait::async_trait;
use conduit_core::error::{AgentError, Result};
use conduit_core::session::{SessionId, ToolSession};
use conduit_core::tool::{ToolDescriptor, ToolRegistry, ToolResult};

use crate::builtin::builtin_tool;

/// Serves a [`ToolRegistry`] through the [`ToolSession`] interface
pub struct LocalSession {
    registry: ToolRegistry,
    open: bool,
}

impl LocalSession {
    pub const fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            open: false,
        }
    }

    /// Session over the named built-in tools
    pub fn builtin<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut registry = ToolRegistry::new();
        for name in names {
            registry.register_boxed(builtin_tool(name.as_ref())?);
        }
        Ok(Self::new(registry))
    }

    pub const fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

#[async_trait]
impl ToolSession for LocalSession {
    async fn connect(&mut self) -> Result<()> {
        self.open = true;
        tracing::debug!(tools = ?self.registry.names(), "Local tool session ready");
        Ok(())
    }

    async fn list_tools(&self, owner: &SessionId) -> Result<Vec<ToolDescriptor>> {
        Ok(self
            .registry
            .schemas()
            .into_iter()
            .map(|schema| schema.into_descriptor(owner.clone()))
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolResult> {
        if !self.open {
            return Err(AgentError::ToolInvocation {
                tool: name.to_string(),
                message: "local session is not open".into(),
            });
        }
        self.registry.execute(name, &arguments).await
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}
