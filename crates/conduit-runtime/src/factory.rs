//! Builds tool sessions from connection parameters

use conduit_core::error::{AgentError, Result};
use conduit_core::session::{ConnectionParams, SessionConfig, SessionFactory, ToolSession};

use crate::local::LocalSession;

/// Maps each [`ConnectionParams`] variant to its session type
#[derive(Clone, Copy, Debug, Default)]
pub struct RuntimeSessionFactory;

impl SessionFactory for RuntimeSessionFactory {
    fn create(&self, config: &SessionConfig) -> Result<Box<dyn ToolSession>> {
        match &config.params {
            ConnectionParams::Builtin { builtin } => {
                tracing::debug!(
                    session = %config.id,
                    tools = ?builtin,
                    "Creating local tool session"
                );
                Ok(Box::new(LocalSession::builtin(builtin.as_slice())?))
            }
            #[cfg(feature = "mcp")]
            ConnectionParams::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                tracing::debug!(session = %config.id, %command, "Creating stdio tool session");
                Ok(Box::new(crate::stdio::StdioSession::new(
                    command.clone(),
                    args.clone(),
                    env.clone(),
                    cwd.clone(),
                )))
            }
            #[cfg(not(feature = "mcp"))]
            ConnectionParams::Stdio { .. } => Err(AgentError::Config(format!(
                "Tool provider '{}' needs the `mcp` feature",
                config.id
            ))),
        }
    }
}

/// Reject unknown builtin names before anything connects
pub fn check_params(config: &SessionConfig) -> Result<()> {
    match &config.params {
        ConnectionParams::Builtin { builtin } if builtin.is_empty() => Err(AgentError::Config(
            format!("Tool provider '{}' lists no builtin tools", config.id),
        )),
        ConnectionParams::Builtin { builtin } => builtin
            .iter()
            .try_for_each(|name| crate::builtin::builtin_tool(name).map(drop)),
        ConnectionParams::Stdio { command, .. } if command.trim().is_empty() => Err(
            AgentError::Config(format!("Tool provider '{}' has an empty command", config.id)),
        ),
        ConnectionParams::Stdio { .. } => Ok(()),
    }
}
