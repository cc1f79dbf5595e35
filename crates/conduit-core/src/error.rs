//! Error Types

use thiserror::Error;

use crate::session::{SessionId, SessionState};

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Invalid or unresolvable configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A tool-provider session failed to connect
    #[error("Connection error for session '{session}': {message}")]
    Connection { session: SessionId, message: String },

    /// Tool name is not present in the routing map
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The session owning a tool is no longer ready
    #[error("Session '{session}' owning tool '{tool}' is not ready")]
    SessionNotReady { session: SessionId, tool: String },

    /// The owning session failed to execute a tool call
    #[error("Tool '{tool}' failed: {message}")]
    ToolInvocation { tool: String, message: String },

    /// No session reached the ready state
    #[error("No tool sessions are ready")]
    NoSessionsReady,

    /// The completion call itself failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// The model kept requesting tools past the configured depth
    #[error("Tool loop exceeded the limit of {0} calls")]
    ToolLoopExceeded(usize),

    /// Another turn is still in flight on this orchestrator
    #[error("A turn is already in progress")]
    TurnInProgress,

    /// A session handle was asked to move backwards or skip a state
    #[error("Session '{session}' cannot move from {from} to {to}")]
    InvalidTransition {
        session: SessionId,
        from: SessionState,
        to: SessionState,
    },

    /// Content could not be built for the backend
    #[error("Content error: {0}")]
    Content(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backend(_) | Self::Connection { .. } | Self::Io(_)
        )
    }

    /// Whether the error is raised while resolving a tool call and should be
    /// fed back to the model instead of aborting the turn.
    pub const fn is_tool_error(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_) | Self::SessionNotReady { .. } | Self::ToolInvocation { .. }
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(msg) => format!("The agent is misconfigured: {msg}"),
            Self::Connection { session, .. } => {
                format!("Could not connect to the '{session}' tool provider.")
            }
            Self::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            Self::SessionNotReady { tool, .. } => {
                format!("The provider for '{tool}' is no longer available.")
            }
            Self::ToolInvocation { tool, message } => format!("Tool '{tool}' failed: {message}"),
            Self::NoSessionsReady => "No tool providers are available.".into(),
            Self::Backend(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ToolLoopExceeded(_) => {
                "The request needed too many tool calls. Please try a simpler query.".into()
            }
            Self::TurnInProgress => "Please wait for the current reply to finish.".into(),
            Self::Content(msg) => format!("Could not prepare the message: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_errors_are_classified() {
        assert!(AgentError::ToolNotFound("x".into()).is_tool_error());
        assert!(
            AgentError::ToolInvocation {
                tool: "x".into(),
                message: "boom".into()
            }
            .is_tool_error()
        );
        assert!(!AgentError::Backend("down".into()).is_tool_error());
        assert!(!AgentError::ToolLoopExceeded(10).is_tool_error());
    }

    #[test]
    fn test_user_message_names_the_tool() {
        let err = AgentError::ToolNotFound("search".into());
        assert_eq!(err.user_message(), "The tool 'search' is not available.");
        assert!(AgentError::Backend("timeout".into()).is_retryable());
    }
}
