//! # conduit-runtime
//!
//! Concrete backends and tool-session transports for conduit.
//!
//! ## Backends
//!
//! - **Ollama** (default): Local LLM inference via Ollama
//!
//! ## Tool sessions
//!
//! - **Local**: in-process [`builtin`] tools
//! - **Stdio** (default, feature `mcp`): MCP servers spawned as child processes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conduit_runtime::{OllamaBackend, RuntimeSessionFactory};
//!
//! let backend = Arc::new(OllamaBackend::from_env());
//! let mut agent = Orchestrator::from_config(config, backend, &RuntimeSessionFactory)?;
//! agent.start().await?;
//! ```

pub mod builtin;
pub mod factory;
pub mod local;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "mcp")]
pub mod stdio;

pub use factory::RuntimeSessionFactory;
pub use local::LocalSession;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaBackend, OllamaConfig};

#[cfg(feature = "mcp")]
pub use stdio::StdioSession;

// Re-export core types for convenience
pub use conduit_core::{
    AgentConfig, AgentError, LlmBackend, Orchestrator, Result, Tool, ToolRegistry, ToolSession,
};
