//! Tool-Session Multiplexer
//!
//! Owns every tool-provider session of an agent, connects them as a unit,
//! merges their catalogs into one name-addressable registry and routes each
//! tool invocation to the session that serves it.
//!
//! ```text
//!              ┌──────────────────────────────┐
//!  invoke ───▶ │ routes: tool name ─▶ session │
//!              └──────────────┬───────────────┘
//!         ┌───────────────────┼───────────────────┐
//!   ┌─────▼─────┐       ┌─────▼─────┐       ┌─────▼─────┐
//!   │ handle #0 │       │ handle #1 │       │ handle #2 │
//!   │  (ready)  │       │ (failed)  │       │  (ready)  │
//!   └───────────┘       └───────────┘       └───────────┘
//! ```
//!
//! Collisions are resolved first-registered-wins: when two ready sessions
//! expose the same tool name, the later duplicate is dropped with a warning.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;

use futures::future::join_all;

use crate::error::{AgentError, Result};
use crate::session::{
    SessionConfig, SessionFactory, SessionHandle, SessionId, SessionState, ToolSession,
};
use crate::tool::{ToolDescriptor, ToolResult};

/// Aggregates N tool sessions behind one catalog and routing surface
#[derive(Default)]
pub struct Multiplexer {
    handles: Vec<SessionHandle>,
    index: HashMap<SessionId, usize>,
    routes: HashMap<String, usize>,
    catalog: Vec<ToolDescriptor>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one `Disconnected` handle per config. Performs no I/O.
    pub fn register(
        &mut self,
        configs: &[SessionConfig],
        factory: &dyn SessionFactory,
    ) -> Result<Vec<SessionId>> {
        let mut ids = Vec::with_capacity(configs.len());
        for config in configs {
            let session = factory.create(config)?;
            ids.push(self.register_session(config.id.clone(), session)?);
        }
        Ok(ids)
    }

    /// Take ownership of an already constructed session
    pub fn register_session(
        &mut self,
        id: SessionId,
        session: Box<dyn ToolSession>,
    ) -> Result<SessionId> {
        if self.index.contains_key(&id) {
            return Err(AgentError::Config(format!("Duplicate tool session id '{id}'")));
        }
        self.index.insert(id.clone(), self.handles.len());
        self.handles.push(SessionHandle::new(id.clone(), session));
        tracing::debug!(session = %id, "Registered tool session");
        Ok(id)
    }

    /// Connect every disconnected session concurrently and wait for all.
    ///
    /// A session that fails is marked `Failed` and left out of the catalog;
    /// the others are unaffected. Returns the errors of the failed sessions.
    pub async fn connect_all(&mut self) -> Vec<AgentError> {
        let next = self
            .handles
            .iter()
            .filter_map(SessionHandle::connect_seq)
            .max()
            .map_or(0, |seq| seq + 1);
        let order = AtomicUsize::new(next);
        let order = &order;

        let pending = self
            .handles
            .iter_mut()
            .filter(|handle| handle.state() == SessionState::Disconnected)
            .map(|handle| async move { handle.connect(order).await });

        let errors: Vec<AgentError> = join_all(pending).await.into_iter().flatten().collect();

        for err in &errors {
            tracing::warn!(error = %err, "Tool session failed to connect");
        }
        tracing::info!(
            ready = self.ready_count(),
            failed = errors.len(),
            "Tool sessions connected"
        );
        errors
    }

    /// List tools on every ready session and rebuild the routing map.
    ///
    /// Tools are merged in registration order. Fails with
    /// [`AgentError::NoSessionsReady`] only when no session is ready.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        let ready: Vec<usize> = self
            .handles
            .iter()
            .enumerate()
            .filter(|(_, handle)| handle.is_ready())
            .map(|(position, _)| position)
            .collect();

        if ready.is_empty() {
            return Err(AgentError::NoSessionsReady);
        }

        let listings = join_all(ready.iter().map(|&position| {
            let handle = &self.handles[position];
            async move { (position, handle.session().list_tools(handle.id()).await) }
        }))
        .await;

        let mut routes: HashMap<String, usize> = HashMap::new();
        let mut catalog = Vec::new();

        for (position, listing) in listings {
            let owner = self.handles[position].id();
            let tools = match listing {
                Ok(tools) => tools,
                Err(err) => {
                    tracing::warn!(session = %owner, error = %err, "Listing tools failed");
                    continue;
                }
            };

            for mut tool in tools {
                if let Some(&winner) = routes.get(&tool.name) {
                    tracing::warn!(
                        tool = %tool.name,
                        kept = %self.handles[winner].id(),
                        dropped = %owner,
                        "Duplicate tool name; keeping the first registered session"
                    );
                    continue;
                }
                tool.session = owner.clone();
                routes.insert(tool.name.clone(), position);
                catalog.push(tool);
            }
        }

        tracing::debug!(tools = catalog.len(), "Aggregated tool catalog");
        self.routes = routes;
        self.catalog.clone_from(&catalog);
        Ok(catalog)
    }

    /// Route a call to the session that owns `name`
    pub async fn invoke(&self, name: &str, arguments: serde_json::Value) -> Result<ToolResult> {
        let position = *self
            .routes
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        let handle = &self.handles[position];

        if !handle.is_ready() {
            return Err(AgentError::SessionNotReady {
                session: handle.id().clone(),
                tool: name.to_string(),
            });
        }

        tracing::debug!(tool = %name, session = %handle.id(), "Invoking tool");
        handle
            .session()
            .call_tool(name, arguments)
            .await
            .map_err(|err| AgentError::ToolInvocation {
                tool: name.to_string(),
                message: match err {
                    AgentError::ToolInvocation { message, .. } => message,
                    other => other.to_string(),
                },
            })
    }

    /// Close every session that started connecting, newest connection first.
    ///
    /// Keeps going when a close fails and reports the first failure at the
    /// end. Calling it again is a no-op.
    pub async fn close_all(&mut self) -> Result<()> {
        let mut order: Vec<usize> = self
            .handles
            .iter()
            .enumerate()
            .filter(|(_, handle)| {
                handle.state().has_started() && handle.state() != SessionState::Closed
            })
            .map(|(position, _)| position)
            .collect();
        // Unsettled connects (no sequence) close last.
        order.sort_by_key(|&position| std::cmp::Reverse(self.handles[position].connect_seq()));

        let mut first_error = None;
        for position in order {
            let handle = &mut self.handles[position];
            if let Err(err) = handle.close().await {
                tracing::warn!(session = %handle.id(), error = %err, "Closing tool session failed");
                first_error.get_or_insert(err);
            } else {
                tracing::debug!(session = %handle.id(), "Closed tool session");
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Catalog from the most recent `list_tools`
    pub fn catalog(&self) -> &[ToolDescriptor] {
        &self.catalog
    }

    /// Session owning `tool`, if routed
    pub fn owner_of(&self, tool: &str) -> Option<&SessionId> {
        self.routes.get(tool).map(|&position| self.handles[position].id())
    }

    /// State of one session
    pub fn state(&self, id: &SessionId) -> Option<SessionState> {
        self.index.get(id).map(|&position| self.handles[position].state())
    }

    /// Every session with its state, in registration order
    pub fn states(&self) -> Vec<(SessionId, SessionState)> {
        self.handles
            .iter()
            .map(|handle| (handle.id().clone(), handle.state()))
            .collect()
    }

    /// Recorded connection error of one session
    pub fn last_error(&self, id: &SessionId) -> Option<&str> {
        self.index
            .get(id)
            .and_then(|&position| self.handles[position].last_error())
    }

    pub fn session_count(&self) -> usize {
        self.handles.len()
    }

    pub fn ready_count(&self) -> usize {
        self.handles.iter().filter(|handle| handle.is_ready()).count()
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        let open = self
            .handles
            .iter()
            .filter(|handle| {
                matches!(
                    handle.state(),
                    SessionState::Ready | SessionState::Failed | SessionState::Connecting
                )
            })
            .count();
        if open > 0 {
            tracing::warn!(open, "Multiplexer dropped without close_all; sessions leaked");
        }
    }
}
