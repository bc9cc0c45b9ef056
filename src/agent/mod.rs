//! Agent workers and the pool that owns them
//!
//! An agent receives a natural-language instruction, may run tools with side
//! effects in its sandbox directory, and eventually answers with text. While
//! it works it publishes progress events to subscribers.
//!
//! # Example
//!
//! ```ignore
//! use llm_press::agent::{AgentPool, LocalPool, EventChannel};
//!
//! let pool = LocalPool::with_cli_backend(50, BackendConfig::default());
//! let agent = pool.create(config).await?;
//!
//! let mut events = agent.subscribe(&[EventChannel::Progress]);
//! let result = agent.chat("Write outline.md").await?;
//! ```

mod cli_agent;
mod pool;
mod stream_parser;
mod types;

pub use cli_agent::CliAgent;
pub use pool::{DEFAULT_MAX_AGENTS, LocalPool};
pub use stream_parser::render_value;
pub use types::{
    Agent, AgentConfig, AgentError, AgentEvent, AgentPool, AgentStatus, EventChannel, EventStream,
    ModelConfig, ToolCall,
};

// Test doubles build agents of their own
#[cfg(test)]
pub use pool::AgentFactory;
#[cfg(test)]
pub use types::{AgentState, ChatResult, EventHub, ToolCallState};
