//! Scripted sessions and backends for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::backend::{BackendToolDef, Completion, GenerationOptions, LlmBackend};
use crate::error::{AgentError, Result};
use crate::message::Turn;
use crate::session::{SessionId, ToolSession};
use crate::tool::{ToolDescriptor, ToolInvocation, ToolResult};

/// Shared counters observed after a session moved into a multiplexer
#[derive(Clone, Default)]
pub struct SessionProbe {
    connects: Arc<AtomicUsize>,
    lists: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    close_log: Option<(String, Arc<Mutex<Vec<String>>>)>,
}

impl SessionProbe {
    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }
}

/// Session serving a fixed set of tool names
pub struct ScriptedSession {
    tools: Vec<String>,
    connect_error: Option<String>,
    connect_delay: Duration,
    list_error: Option<String>,
    close_error: Option<String>,
    results: HashMap<String, std::result::Result<serde_json::Value, String>>,
    probe: SessionProbe,
}

impl ScriptedSession {
    pub fn new(tools: Vec<&str>) -> (Self, SessionProbe) {
        let probe = SessionProbe::default();
        let session = Self {
            tools: tools.into_iter().map(String::from).collect(),
            connect_error: None,
            connect_delay: Duration::ZERO,
            list_error: None,
            close_error: None,
            results: HashMap::new(),
            probe: probe.clone(),
        };
        (session, probe)
    }

    pub fn failing(message: &str) -> (Self, SessionProbe) {
        let (mut session, probe) = Self::new(vec![]);
        session.connect_error = Some(message.into());
        (session, probe)
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_list_error(mut self, message: &str) -> Self {
        self.list_error = Some(message.into());
        self
    }

    pub fn with_close_error(mut self, message: &str) -> Self {
        self.close_error = Some(message.into());
        self
    }

    pub fn with_result(mut self, tool: &str, payload: serde_json::Value) -> Self {
        self.results.insert(tool.into(), Ok(payload));
        self
    }

    pub fn with_call_error(mut self, tool: &str, message: &str) -> Self {
        self.results.insert(tool.into(), Err(message.into()));
        self
    }

    /// Append this session's id to `log` when it is closed
    pub fn logging_closes_to(mut self, id: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.probe.close_log = Some((id.into(), log));
        self
    }
}

#[async_trait]
impl ToolSession for ScriptedSession {
    async fn connect(&mut self) -> Result<()> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        match &self.connect_error {
            Some(message) => Err(AgentError::Other(message.clone())),
            None => Ok(()),
        }
    }

    async fn list_tools(&self, owner: &SessionId) -> Result<Vec<ToolDescriptor>> {
        self.probe.lists.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.list_error {
            return Err(AgentError::Other(message.clone()));
        }
        Ok(self
            .tools
            .iter()
            .map(|name| {
                ToolDescriptor::new(
                    name.clone(),
                    format!("{name} served by {owner}"),
                    json!({"type": "object", "properties": {}}),
                    owner.clone(),
                )
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolResult> {
        self.probe
            .calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        match self.results.get(name) {
            Some(Ok(payload)) => Ok(ToolResult::success(payload.clone())),
            Some(Err(message)) => Err(AgentError::Other(message.clone())),
            None => Ok(ToolResult::success(json!({ "tool": name }))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        if let Some((id, log)) = &self.probe.close_log {
            log.lock().unwrap().push(id.clone());
        }
        match &self.close_error {
            Some(message) => Err(AgentError::Other(message.clone())),
            None => Ok(()),
        }
    }
}

/// One scripted backend response
pub enum Step {
    /// Stream these chunks, then finish
    Text(Vec<&'static str>),
    /// Stream these chunks, then fail mid-stream
    TextThenError(Vec<&'static str>, &'static str),
    /// Stream these chunks, then never finish
    TextThenHang(Vec<&'static str>),
    /// Request a tool call
    Tool(ToolInvocation),
    /// Fail the post itself
    Fail(&'static str),
}

/// What the backend saw on one `post`
#[derive(Clone, Debug)]
pub struct PostRecord {
    pub history_len: usize,
    pub tool_names: Vec<String>,
}

/// Backend replaying a queue of [`Step`]s
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    repeat_tool: Option<ToolInvocation>,
    posts: Arc<Mutex<Vec<PostRecord>>>,
    live_streams: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            repeat_tool: None,
            posts: Arc::new(Mutex::new(Vec::new())),
            live_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Backend that requests the same tool forever
    pub fn looping(call: ToolInvocation) -> Self {
        Self {
            repeat_tool: Some(call),
            ..Self::new(vec![])
        }
    }

    pub fn posts(&self) -> Arc<Mutex<Vec<PostRecord>>> {
        Arc::clone(&self.posts)
    }

    /// Number of text streams handed out and not yet dropped
    pub fn live_streams(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.live_streams)
    }

    fn chunk_stream(
        &self,
        chunks: Vec<&'static str>,
        tail: Option<Result<String>>,
        hang: bool,
    ) -> crate::backend::TextStream {
        let guard = LiveStream::new(Arc::clone(&self.live_streams));
        Box::pin(async_stream::stream! {
            let _guard = guard;
            for chunk in chunks {
                yield Ok(chunk.to_string());
            }
            if let Some(item) = tail {
                yield item;
            }
            if hang {
                futures::future::pending::<()>().await;
            }
        })
    }
}

/// Counts a text stream as live until it is dropped
struct LiveStream(Arc<AtomicUsize>);

impl LiveStream {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn post(
        &self,
        history: &[Turn],
        _options: &GenerationOptions,
        tools: &[BackendToolDef],
    ) -> Result<Completion> {
        self.posts.lock().unwrap().push(PostRecord {
            history_len: history.len(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });

        if let Some(call) = &self.repeat_tool {
            return Ok(Completion::ToolCall(ToolInvocation::new(
                call.name.clone(),
                call.arguments.clone(),
            )));
        }

        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::Backend("script exhausted".into()))?;

        match step {
            Step::Text(chunks) => Ok(Completion::Text(self.chunk_stream(chunks, None, false))),
            Step::TextThenError(chunks, message) => Ok(Completion::Text(self.chunk_stream(
                chunks,
                Some(Err(AgentError::Backend(message.into()))),
                false,
            ))),
            Step::TextThenHang(chunks) => {
                Ok(Completion::Text(self.chunk_stream(chunks, None, true)))
            }
            Step::Tool(call) => Ok(Completion::ToolCall(call)),
            Step::Fail(message) => Err(AgentError::Backend(message.into())),
        }
    }
}
