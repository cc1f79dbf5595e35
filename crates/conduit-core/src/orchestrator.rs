//! Agent Orchestrator
//!
//! Drives one conversational turn: submits History to the backend, streams
//! plain-text answers back to the caller, and resolves tool calls through
//! the multiplexer until the model produces text or the loop bound trips.
//!
//! ```text
//!  Idle ──▶ AwaitingModel ──text──▶ StreamingText ──▶ Idle
//!               ▲      │
//!               │    tool call (depth += 1)
//!               │      ▼
//!               └── ToolCallPending
//! ```
//!
//! [`Orchestrator::turn`] borrows the orchestrator mutably for as long as its
//! stream lives, so at most one turn is ever in flight. Dropping the stream
//! cancels the turn: the backend stream is released, no partial agent Turn
//! is recorded and the state returns to `Idle`.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::backend::{Completion, ContentKind, GenerationOptions, LlmBackend};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::message::{Conversation, Role, Turn, TurnMetadata};
use crate::multiplexer::Multiplexer;
use crate::session::SessionFactory;
use crate::tool::{ToolDescriptor, ToolResult};

/// Text chunks of one turn, in backend order
pub type TurnStream<'a> = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>>;

/// Where the current turn is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingModel,
    StreamingText,
    ToolCallPending,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingModel => "awaiting_model",
            Self::StreamingText => "streaming_text",
            Self::ToolCallPending => "tool_call_pending",
        };
        f.write_str(name)
    }
}

/// Puts the orchestrator back to `Idle` however the turn ends
struct TurnGuard<'a> {
    state: &'a mut TurnState,
}

impl TurnGuard<'_> {
    fn set(&mut self, next: TurnState) {
        tracing::trace!(from = %self.state, to = %next, "Turn transition");
        *self.state = next;
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        *self.state = TurnState::Idle;
    }
}

/// One agent: a backend, its tool sessions and a conversation
pub struct Orchestrator {
    config: AgentConfig,
    backend: Arc<dyn LlmBackend>,
    multiplexer: Multiplexer,
    history: Conversation,
    state: TurnState,
}

impl Orchestrator {
    pub fn new(
        config: AgentConfig,
        backend: Arc<dyn LlmBackend>,
        multiplexer: Multiplexer,
    ) -> Self {
        Self {
            config,
            backend,
            multiplexer,
            history: Conversation::new(),
            state: TurnState::Idle,
        }
    }

    /// Validate `config` and register one session per tool provider
    pub fn from_config(
        config: AgentConfig,
        backend: Arc<dyn LlmBackend>,
        factory: &dyn SessionFactory,
    ) -> Result<Self> {
        config.validate()?;
        let mut multiplexer = Multiplexer::new();
        multiplexer.register(&config.sessions(), factory)?;
        Ok(Self::new(config, backend, multiplexer))
    }

    /// Initialize the backend and connect every tool session.
    ///
    /// Sessions that fail to connect are logged and returned; the agent runs
    /// with whatever tools the remaining sessions provide.
    pub async fn start(&mut self) -> Result<Vec<AgentError>> {
        self.backend.initialize().await?;
        let failures = self.multiplexer.connect_all().await;
        for failure in &failures {
            tracing::error!(
                agent = %self.config.agent_id,
                error = %failure,
                "Tool provider unavailable"
            );
        }
        tracing::info!(
            agent = %self.config.agent_id,
            backend = self.backend.name(),
            sessions = self.multiplexer.session_count(),
            ready = self.multiplexer.ready_count(),
            "Agent started"
        );
        Ok(failures)
    }

    /// Run one turn for `text`.
    ///
    /// The user Turn is recorded immediately. The agent Turn is recorded only
    /// once the returned stream has been fully consumed without error.
    pub fn turn(&mut self, text: impl Into<String>) -> TurnStream<'_> {
        if self.state != TurnState::Idle {
            return Box::pin(futures::stream::once(async {
                Err::<String, _>(AgentError::TurnInProgress)
            }));
        }

        let Self {
            config,
            backend,
            multiplexer,
            history,
            state,
        } = self;

        history.append(Turn::user(text));

        let mut guard = TurnGuard { state };
        guard.set(TurnState::AwaitingModel);

        Box::pin(drive_turn(TurnContext {
            guard,
            multiplexer,
            history,
            backend: Arc::clone(backend),
            options: config.generation_options(),
            limit: config.loop_depth_limit,
            model: config.model_name.clone(),
        }))
    }

    /// Build a turn from a payload through the backend, e.g. a file reference
    pub fn create_content(&self, payload: &str, kind: ContentKind) -> Result<Turn> {
        self.backend.create_content(payload, kind, Role::User)
    }

    /// Drop the conversation; only allowed between turns
    pub fn clear(&mut self) -> Result<()> {
        if self.state != TurnState::Idle {
            return Err(AgentError::TurnInProgress);
        }
        self.history.clear();
        Ok(())
    }

    /// Close every tool session, then drop the conversation
    pub async fn close(&mut self) -> Result<()> {
        let closed = self.multiplexer.close_all().await;
        self.history.clear();
        tracing::info!(agent = %self.config.agent_id, "Agent closed");
        closed
    }

    pub fn history(&self) -> &Conversation {
        &self.history
    }

    pub const fn state(&self) -> TurnState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub const fn multiplexer(&self) -> &Multiplexer {
        &self.multiplexer
    }
}

/// Borrowed state one turn runs against
struct TurnContext<'a> {
    guard: TurnGuard<'a>,
    multiplexer: &'a mut Multiplexer,
    history: &'a mut Conversation,
    backend: Arc<dyn LlmBackend>,
    options: GenerationOptions,
    limit: usize,
    model: String,
}

fn drive_turn(ctx: TurnContext<'_>) -> impl Stream<Item = Result<String>> + Send + '_ {
    async_stream::try_stream! {
        let TurnContext {
            mut guard,
            multiplexer,
            history,
            backend,
            options,
            limit,
            model,
        } = ctx;
        let mut depth = 0usize;

        loop {
            guard.set(TurnState::AwaitingModel);
            let catalog = refresh_catalog(multiplexer).await?;
            let tool_defs = backend.create_tool_defs(&catalog);
            let snapshot = history.snapshot();
            tracing::debug!(
                turns = snapshot.len(),
                tokens = history.estimate_tokens(),
                tools = tool_defs.len(),
                "Requesting completion"
            );

            match backend.post(&snapshot, &options, &tool_defs).await? {
                Completion::Text(mut chunks) => {
                    guard.set(TurnState::StreamingText);
                    let mut reply = String::new();
                    while let Some(chunk) = chunks.next().await {
                        let chunk = chunk?;
                        reply.push_str(&chunk);
                        yield chunk;
                    }
                    let metadata = TurnMetadata {
                        model: Some(model.clone()),
                        ..TurnMetadata::default()
                    };
                    history.append(Turn::agent(reply).with_metadata(metadata));
                    break;
                }
                Completion::ToolCall(call) => {
                    guard.set(TurnState::ToolCallPending);
                    depth += 1;
                    if depth > limit {
                        tracing::warn!(tool = %call.name, limit, "Tool loop limit reached");
                        Err::<(), _>(AgentError::ToolLoopExceeded(limit))?;
                    }

                    tracing::info!(tool = %call.name, depth, "Model requested tool");
                    let invoked = multiplexer.invoke(&call.name, call.arguments.clone()).await;
                    let result = match invoked {
                        Ok(result) => result,
                        Err(err) if err.is_tool_error() => {
                            tracing::warn!(tool = %call.name, error = %err, "Tool call failed");
                            ToolResult::from_error(&err)
                        }
                        Err(err) => Err::<ToolResult, _>(err)?,
                    };
                    history.append(Turn::tool_result(&call, &result));
                }
            }
        }
    }
}

/// Catalog for the next model request; no ready session means no tools
async fn refresh_catalog(multiplexer: &mut Multiplexer) -> Result<Vec<ToolDescriptor>> {
    match multiplexer.list_tools().await {
        Err(AgentError::NoSessionsReady) => Ok(Vec::new()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use serde_json::json;

    use crate::message::Part;
    use crate::session::ToolSession;
    use crate::testing::{ScriptedBackend, ScriptedSession, Step};
    use crate::tool::{ToolInvocation, ToolOutcome};

    async fn agent(
        backend: ScriptedBackend,
        sessions: Vec<(&str, ScriptedSession)>,
        limit: usize,
    ) -> Orchestrator {
        let mut multiplexer = Multiplexer::new();
        for (id, session) in sessions {
            let session: Box<dyn ToolSession> = Box::new(session);
            multiplexer.register_session(id.into(), session).unwrap();
        }
        let config = AgentConfig::new("chat", "Chat", "test-model").with_loop_depth_limit(limit);
        let mut orchestrator = Orchestrator::new(config, Arc::new(backend), multiplexer);
        orchestrator.start().await.unwrap();
        orchestrator
    }

    async fn collect(stream: TurnStream<'_>) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_plain_text_appends_one_agent_turn() {
        let backend = ScriptedBackend::new(vec![Step::Text(vec!["Hel", "lo", "!"])]);
        let mut orchestrator = agent(backend, vec![], 10).await;

        let chunks = collect(orchestrator.turn("hi")).await;
        let chunks: Vec<String> = chunks.into_iter().map(Result::unwrap).collect();
        assert_eq!(chunks, ["Hel", "lo", "!"]);

        let history = orchestrator.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[0].role(), Role::User);
        let last = history.last().unwrap();
        assert_eq!(last.role(), Role::Agent);
        assert_eq!(last.text(), "Hello!");
        assert_eq!(last.metadata().model.as_deref(), Some("test-model"));
        assert_eq!(orchestrator.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_list_files_scenario() {
        let (files, probe) = ScriptedSession::new(vec!["list_files"]);
        let files = files.with_result("list_files", json!({"files": ["a.txt"]}));
        let backend = ScriptedBackend::new(vec![
            Step::Tool(ToolInvocation::new("list_files", json!({"directory_path": "/tmp"}))),
            Step::Text(vec!["Found ", "a.txt"]),
        ]);
        let posts = backend.posts();
        let mut orchestrator = agent(backend, vec![("filesystem", files)], 10).await;

        let chunks = collect(orchestrator.turn("list files in /tmp")).await;
        assert!(chunks.iter().all(Result::is_ok));

        let history = orchestrator.history();
        assert_eq!(history.len(), 3);
        assert!(history.turns()[1].is_tool_result());
        assert_eq!(history.turns()[1].tool_outcome(), Some(ToolOutcome::Success));
        assert_eq!(history.last().unwrap().text(), "Found a.txt");

        assert_eq!(
            probe.calls(),
            vec![("list_files".to_string(), json!({"directory_path": "/tmp"}))]
        );

        let posts = posts.lock().unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].tool_names, ["list_files"]);
        assert_eq!(posts[0].history_len, 1);
        assert_eq!(posts[1].history_len, 2);
    }

    #[tokio::test]
    async fn test_tool_loop_is_bounded() {
        let (session, probe) = ScriptedSession::new(vec!["search"]);
        let backend =
            ScriptedBackend::looping(ToolInvocation::new("search", json!({"q": "again"})));
        let mut orchestrator = agent(backend, vec![("web", session)], 3).await;

        let chunks = collect(orchestrator.turn("find it")).await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], Err(AgentError::ToolLoopExceeded(3))));

        // user + one result per allowed call; the call past the limit never runs
        let history = orchestrator.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history.turns().iter().filter(|t| t.is_tool_result()).count(), 3);
        assert_eq!(probe.calls().len(), 3);
        assert!(history.turns().iter().all(|t| t.role() == Role::User || t.is_tool_result()));
        assert_eq!(orchestrator.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_backend_error_keeps_only_user_turn() {
        let backend = ScriptedBackend::new(vec![
            Step::Fail("connection refused"),
            Step::Text(vec!["ok"]),
        ]);
        let mut orchestrator = agent(backend, vec![], 10).await;

        let chunks = collect(orchestrator.turn("hello")).await;
        assert!(matches!(chunks.as_slice(), [Err(AgentError::Backend(_))]));
        assert_eq!(orchestrator.history().len(), 1);
        assert_eq!(orchestrator.history().last().unwrap().role(), Role::User);

        // Still usable afterwards.
        let chunks = collect(orchestrator.turn("again")).await;
        assert!(chunks.iter().all(Result::is_ok));
        assert_eq!(orchestrator.history().len(), 3);
    }

    #[tokio::test]
    async fn test_mid_stream_error_records_no_agent_turn() {
        let backend = ScriptedBackend::new(vec![Step::TextThenError(vec!["par"], "stream reset")]);
        let mut orchestrator = agent(backend, vec![], 10).await;

        let chunks = collect(orchestrator.turn("hello")).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_deref().unwrap(), "par");
        assert!(matches!(chunks[1], Err(AgentError::Backend(_))));
        assert_eq!(orchestrator.history().len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_turn() {
        let backend = ScriptedBackend::new(vec![
            Step::TextThenHang(vec!["partial"]),
            Step::Text(vec!["done"]),
        ]);
        let live_streams = backend.live_streams();
        let mut orchestrator = agent(backend, vec![], 10).await;

        {
            let mut stream = orchestrator.turn("slow question");
            let first = stream.next().await.unwrap().unwrap();
            assert_eq!(first, "partial");
            let pending =
                tokio::time::timeout(std::time::Duration::from_millis(20), stream.next()).await;
            assert!(pending.is_err());
            assert_eq!(live_streams.load(Ordering::SeqCst), 1);
        }

        assert_eq!(live_streams.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.state(), TurnState::Idle);
        assert_eq!(orchestrator.history().len(), 1);

        let chunks = collect(orchestrator.turn("next")).await;
        assert!(chunks.iter().all(Result::is_ok));
        assert_eq!(orchestrator.history().len(), 3);
        assert_eq!(orchestrator.history().last().unwrap().text(), "done");
    }

    #[tokio::test]
    async fn test_tool_errors_become_error_turns() {
        let (session, _) = ScriptedSession::new(vec!["explode"]);
        let session = session.with_call_error("explode", "disk full");
        let backend = ScriptedBackend::new(vec![
            Step::Tool(ToolInvocation::new("explode", json!({}))),
            Step::Tool(ToolInvocation::new("missing_tool", json!({}))),
            Step::Text(vec!["Sorry, that failed."]),
        ]);
        let mut orchestrator = agent(backend, vec![("local", session)], 10).await;

        let chunks = collect(orchestrator.turn("do it")).await;
        assert!(chunks.iter().all(Result::is_ok));

        let turns = orchestrator.history().turns();
        assert_eq!(turns.len(), 4);
        for turn in &turns[1..3] {
            assert_eq!(turn.tool_outcome(), Some(ToolOutcome::Error));
        }
        match &turns[2].parts()[0] {
            Part::Data { data } => {
                assert!(data["payload"]["error"].as_str().unwrap().contains("missing_tool"));
            }
            other => panic!("unexpected part {other:?}"),
        }
        assert_eq!(turns[3].text(), "Sorry, that failed.");
    }

    #[tokio::test]
    async fn test_no_ready_sessions_means_no_tools() {
        let (broken, _) = ScriptedSession::failing("spawn failed");
        let backend = ScriptedBackend::new(vec![Step::Text(vec!["plain answer"])]);
        let posts = backend.posts();
        let mut orchestrator = agent(backend, vec![("broken", broken)], 10).await;

        let chunks = collect(orchestrator.turn("hi")).await;
        assert!(chunks.iter().all(Result::is_ok));
        assert!(posts.lock().unwrap()[0].tool_names.is_empty());
    }

    #[tokio::test]
    async fn test_forgotten_stream_blocks_new_turns() {
        let backend = ScriptedBackend::new(vec![Step::Text(vec!["unused"])]);
        let mut orchestrator = agent(backend, vec![], 10).await;

        std::mem::forget(orchestrator.turn("leaked"));
        assert_eq!(orchestrator.state(), TurnState::AwaitingModel);
        assert!(matches!(orchestrator.clear(), Err(AgentError::TurnInProgress)));

        let chunks = collect(orchestrator.turn("second")).await;
        assert!(matches!(chunks.as_slice(), [Err(AgentError::TurnInProgress)]));
        assert_eq!(orchestrator.history().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_and_close() {
        let (session, probe) = ScriptedSession::new(vec!["t"]);
        let backend = ScriptedBackend::new(vec![Step::Text(vec!["a"]), Step::Text(vec!["b"])]);
        let mut orchestrator = agent(backend, vec![("s", session)], 10).await;

        collect(orchestrator.turn("one")).await;
        orchestrator.clear().unwrap();
        assert!(orchestrator.history().is_empty());

        collect(orchestrator.turn("two")).await;
        assert_eq!(orchestrator.history().len(), 2);

        orchestrator.close().await.unwrap();
        orchestrator.close().await.unwrap();
        assert!(orchestrator.history().is_empty());
        assert_eq!(probe.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_create_content_goes_through_backend() {
        let orchestrator = agent(ScriptedBackend::new(vec![]), vec![], 10).await;

        let turn = orchestrator.create_content("notes/todo.md", ContentKind::File).unwrap();
        assert_eq!(turn.role(), Role::User);
        assert!(matches!(
            &turn.parts()[0],
            Part::File { mime_type, .. } if mime_type == "text/markdown"
        ));

        let unknown = orchestrator.create_content("blob.zzz", ContentKind::File);
        assert!(matches!(unknown, Err(AgentError::Content(_))));
    }

    #[tokio::test]
    async fn test_from_config_registers_in_tool_order() {
        use crate::session::{ConnectionParams, SessionConfig};

        struct Factory;
        impl SessionFactory for Factory {
            fn create(&self, _config: &SessionConfig) -> Result<Box<dyn ToolSession>> {
                Ok(Box::new(ScriptedSession::new(vec![]).0))
            }
        }

        let params = ConnectionParams::Builtin { builtin: vec![] };
        let config = AgentConfig::new("chat", "Chat", "m")
            .with_session(SessionConfig::new("second", params.clone()))
            .with_session(SessionConfig::new("first", params));
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let orchestrator = Orchestrator::from_config(config, backend, &Factory).unwrap();

        let ids: Vec<_> = orchestrator
            .multiplexer()
            .states()
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(ids, ["second", "first"]);
        assert_eq!(orchestrator.name(), "Chat");

        let invalid = AgentConfig::new("chat", "Chat", "m").with_loop_depth_limit(0);
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        assert!(Orchestrator::from_config(invalid, backend, &Factory).is_err());
    }
}
