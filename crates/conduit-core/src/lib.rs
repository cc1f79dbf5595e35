//! # conduit-core
//!
//! Conversational agent loop over a provider-agnostic LLM backend, with tools
//! aggregated from any number of tool-provider sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                          │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌────────────────┐  │
//! │  │ Conversation │  │   Multiplexer    │  │   LlmBackend   │  │
//! │  │   (History)  │──│ (tool routing)   │──│   (Strategy)   │  │
//! │  └──────────────┘  └────────┬─────────┘  └────────────────┘  │
//! └─────────────────────────────┼────────────────────────────────┘
//!                  ┌────────────┼────────────┐
//!            ToolSession   ToolSession   ToolSession
//! ```
//!
//! The `LlmBackend` trait enables swapping model providers and the
//! `ToolSession` trait swapping tool transports without changing the loop.

pub mod backend;
pub mod config;
pub mod error;
pub mod message;
pub mod multiplexer;
pub mod orchestrator;
pub mod session;
pub mod tool;

#[cfg(test)]
mod testing;

pub use backend::{
    BackendToolDef, Completion, ContentKind, GenerationOptions, LlmBackend, TextStream,
};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use message::{Conversation, Part, Role, Turn};
pub use multiplexer::Multiplexer;
pub use orchestrator::{Orchestrator, TurnState, TurnStream};
pub use session::{
    ConnectionParams, SessionConfig, SessionFactory, SessionId, SessionState, ToolSession,
};
pub use tool::{
    ParameterSchema, Tool, ToolDescriptor, ToolInvocation, ToolOutcome, ToolRegistry, ToolResult,
    ToolSchema,
};
