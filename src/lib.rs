//! # Kestrel
//!
//! A tool-calling LLM agent runtime built with Rust.
//!
//! ## Architecture
//!
//! Kestrel is the core of an agent system: it accepts a natural-language
//! prompt, converses with an OpenAI-compatible chat-completions endpoint,
//! and executes the model's requested actions against a registry of tools
//! until a final answer is produced.
//!
//! - **Agent** (`agent`): the bounded control loop, rolling conversation
//!   memory, loop detection, and the LLM client adapter
//! - **Tools** (`tools`): the tool contract, the process-wide registry, the
//!   invocation layer (argument parsing, schema validation, timeouts,
//!   caching, safety gate), and the built-in planning and terminate tools
//! - **Configuration** (`config`): layered file + environment configuration
//! - **Errors** (`error`): one error type with a stable kind taxonomy
//!
//! ## Design Principles
//!
//! 1. **Explicit state**: the agent is always in exactly one lifecycle
//!    state; transitions are checked
//! 2. **Results, not exceptions**: tool failures become tagged results the
//!    model can observe and react to
//! 3. **Dependency injection**: one registry constructed at startup and
//!    passed in; the global accessor exists only for legacy call sites
//! 4. **Cooperative cancellation**: one token threaded through the loop,
//!    every tool, and the LLM client
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kestrel::config::RuntimeConfig;
//! use kestrel::{Agent, LlmClient, RunMode, TerminateTool, ToolRegistry};
//!
//! #[tokio::main]
//! async fn main() -> kestrel::Result<()> {
//!     let config = RuntimeConfig::default();
//!     let registry = Arc::new(ToolRegistry::new());
//!     registry.register(Arc::new(TerminateTool))?;
//!
//!     let llm = Arc::new(LlmClient::new(config.llm)?);
//!     let mut agent = Agent::new(config.agent, llm, registry);
//!     let outcome = agent.run("Say hi", RunMode::Action).await?;
//!     println!("{}", outcome.response);
//!     agent.shutdown().await;
//!     Ok(())
//! }
//! ```

// Agent logic and LLM interaction
pub mod agent;

// Runtime configuration
pub mod config;

// Error types
pub mod error;

// Tool contract, registry, invocation, and built-in tools
pub mod tools;

// Re-export commonly used items
pub use error::{Error, ErrorKind, Result};

pub use agent::{
    Agent, AgentState, Artifact, LlmClient, LlmReply, MessageStore, RunMode, RunOutcome,
    RunStatus,
};
pub use agent::types::{Message, Role};
pub use tools::{
    global_registry, Plan, PlanGenerator, PlanningTool, StepExecutor, TerminateTool, Tool,
    ToolCall, ToolInvoker, ToolRegistry, ToolResult, ToolStatus,
};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
