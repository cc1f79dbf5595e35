//! Tool-Provider Sessions
//!
//! The [`ToolSession`] capability every tool provider implements, the
//! connection parameters used to build one, and the [`SessionHandle`] that
//! tracks a session's lifecycle inside the multiplexer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::tool::{ToolDescriptor, ToolResult};

/// Unique session identifier (the provider name from configuration)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session handle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Failed,
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Ready | Self::Failed)
                | (Self::Ready | Self::Failed, Self::Closed)
        )
    }

    /// Whether the session ever started connecting, and so owns resources
    pub const fn has_started(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How to reach a tool provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConnectionParams {
    /// Child process speaking the tool protocol over stdio
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    /// In-process tools, selected by name
    Builtin { builtin: Vec<String> },
}

/// Resolved parameters for one session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub id: SessionId,
    pub params: ConnectionParams,
}

impl SessionConfig {
    pub fn new(id: impl Into<String>, params: ConnectionParams) -> Self {
        Self {
            id: SessionId::new(id),
            params,
        }
    }
}

/// Capability exposed by every tool provider
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Establish the session
    async fn connect(&mut self) -> Result<()>;

    /// List the tools this session serves, tagged with `owner`
    async fn list_tools(&self, owner: &SessionId) -> Result<Vec<ToolDescriptor>>;

    /// Execute one tool call
    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolResult>;

    /// Release the session's resources; must be idempotent
    async fn close(&mut self) -> Result<()>;
}

/// Builds sessions from configuration without performing I/O
pub trait SessionFactory: Send + Sync {
    fn create(&self, config: &SessionConfig) -> Result<Box<dyn ToolSession>>;
}

/// A session plus its lifecycle bookkeeping; owned by the multiplexer
pub struct SessionHandle {
    id: SessionId,
    state: SessionState,
    session: Box<dyn ToolSession>,
    last_error: Option<String>,
    connect_seq: Option<usize>,
}

impl SessionHandle {
    pub fn new(id: SessionId, session: Box<dyn ToolSession>) -> Self {
        Self {
            id,
            state: SessionState::Disconnected,
            session,
            last_error: None,
            connect_seq: None,
        }
    }

    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub const fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Ready)
    }

    pub(crate) const fn connect_seq(&self) -> Option<usize> {
        self.connect_seq
    }

    pub(crate) fn session(&self) -> &dyn ToolSession {
        &*self.session
    }

    /// Move to `next`, rejecting anything but a forward transition
    pub(crate) fn advance(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(AgentError::InvalidTransition {
                session: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(session = %self.id, from = %self.state, to = %next, "Session transition");
        self.state = next;
        Ok(())
    }

    /// Drive Disconnected -> Connecting -> Ready | Failed
    ///
    /// `order` hands out the position at which the connect attempt settled,
    /// which the multiplexer reverses when closing. Returns the connection
    /// error, if any, after recording it.
    pub(crate) async fn connect(&mut self, order: &AtomicUsize) -> Option<AgentError> {
        if let Err(err) = self.advance(SessionState::Connecting) {
            return Some(err);
        }

        let outcome = self.session.connect().await;
        self.connect_seq = Some(order.fetch_add(1, Ordering::SeqCst));

        match outcome {
            Ok(()) => {
                // Connecting always accepts Ready.
                self.state = SessionState::Ready;
                None
            }
            Err(err) => {
                self.state = SessionState::Failed;
                let message = match err {
                    AgentError::Connection { message, .. } => message,
                    other => other.to_string(),
                };
                self.last_error = Some(message.clone());
                Some(AgentError::Connection {
                    session: self.id.clone(),
                    message,
                })
            }
        }
    }

    /// Close the session if it holds resources; no-op once closed
    pub(crate) async fn close(&mut self) -> Result<()> {
        match self.state {
            SessionState::Ready | SessionState::Failed => {
                // The state flips first so a failed close is never retried.
                self.advance(SessionState::Closed)?;
                self.session.close().await
            }
            SessionState::Connecting => {
                // Only reachable if a connect future was dropped mid-flight.
                self.state = SessionState::Closed;
                self.session.close().await
            }
            SessionState::Disconnected | SessionState::Closed => Ok(()),
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}
