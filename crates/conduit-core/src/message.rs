//! Conversation Turns
//!
//! Standard turn format used across the agent system, and the append-only
//! store that holds a conversation's history.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::{ToolInvocation, ToolOutcome, ToolResult};

/// Author of a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User input
    User,
    /// Agent output (model text and tool results)
    Agent,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// Where the bytes of a file part live
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSource {
    /// Base64-encoded inline content
    Bytes(String),
    /// Reference to external content
    Uri(String),
}

/// A single piece of turn content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text {
        text: String,
    },
    File {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        mime_type: String,
        source: FileSource,
    },
    Data {
        data: serde_json::Value,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn data(data: serde_json::Value) -> Self {
        Self::Data { data }
    }

    /// Text content, if this is a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Additional turn metadata
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    /// Correlation id of the tool call this turn answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Name of the tool whose result this turn carries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Arguments the tool was called with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_arguments: Option<serde_json::Value>,

    /// Model that generated this (for agent turns)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Custom key-value pairs
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A single turn in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    parts: Vec<Part>,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    metadata: TurnMetadata,
}

impl Turn {
    /// Create a new turn
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            timestamp: Utc::now(),
            metadata: TurnMetadata::default(),
        }
    }

    /// Create a user text turn
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Create an agent text turn
    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, vec![Part::text(text)])
    }

    /// Create the turn recording a tool call's result
    pub fn tool_result(invocation: &ToolInvocation, result: &ToolResult) -> Self {
        let data = serde_json::json!({
            "tool": invocation.name,
            "outcome": result.outcome,
            "payload": result.payload,
        });
        let mut turn = Self::new(Role::Agent, vec![Part::data(data)]);
        turn.metadata.tool_call_id = Some(invocation.correlation_id.clone());
        turn.metadata.tool_name = Some(invocation.name.clone());
        turn.metadata.tool_arguments = Some(invocation.arguments.clone());
        turn
    }

    /// Attach metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: TurnMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub const fn role(&self) -> Role {
        self.role
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub const fn metadata(&self) -> &TurnMetadata {
        &self.metadata
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    /// Whether this turn carries a tool result
    pub const fn is_tool_result(&self) -> bool {
        self.metadata.tool_call_id.is_some()
    }

    /// Outcome recorded in a tool-result turn
    pub fn tool_outcome(&self) -> Option<ToolOutcome> {
        if !self.is_tool_result() {
            return None;
        }
        self.parts.iter().find_map(|part| match part {
            Part::Data { data } => data
                .get("outcome")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            _ => None,
        })
    }

    /// Estimate token count (rough approximation)
    pub fn estimate_tokens(&self) -> u32 {
        let chars: usize = self
            .parts
            .iter()
            .map(|part| match part {
                Part::Text { text } => text.len(),
                Part::File { mime_type, .. } => mime_type.len() + 16,
                Part::Data { data } => data.to_string().len(),
            })
            .sum();
        // ~4 characters per token, +4 for role overhead
        u32::try_from(chars / 4).unwrap_or(u32::MAX).saturating_add(4)
    }
}

/// Append-only conversation history
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Immutable ordered copy for submission to a backend
    pub fn snapshot(&self) -> Arc<[Turn]> {
        Arc::from(self.turns.as_slice())
    }

    /// Borrow all turns
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Get the last turn
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Remove every turn
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Estimate total tokens in conversation
    pub fn estimate_tokens(&self) -> u32 {
        self.turns.iter().map(Turn::estimate_tokens).sum()
    }

    /// Number of turns
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
