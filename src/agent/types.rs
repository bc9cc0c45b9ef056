//! Core types and traits for agent workers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error types that can occur while creating or driving an agent
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// The worker process could not be started
    #[error("failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    /// The worker process exited unsuccessfully
    #[error("execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The worker reported an error result
    #[error("agent reported an error: {message}")]
    Reported { message: String },

    /// Request timed out
    #[error("timeout after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Failed to read the worker's output
    #[error("io error: {message}")]
    Io { message: String },

    #[error("agent not found: {id}")]
    NotFound { id: String },

    #[error("agent already exists: {id}")]
    AlreadyExists { id: String },

    #[error("agent pool is full ({capacity} agents)")]
    PoolFull { capacity: usize },

    #[error("agent is closed: {id}")]
    Closed { id: String },
}

impl AgentError {
    /// Create a spawn error
    pub fn spawn(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Spawn {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create an io error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }
}

/// Model settings shared by every agent of a workflow
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,

    /// Never serialized
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Environment variables that point a worker process at this model
    pub fn provider_env(&self) -> Vec<(String, String)> {
        let prefix = match self.provider.as_str() {
            "anthropic" => "ANTHROPIC",
            "openai" | "deepseek" | "glm" => "OPENAI",
            _ => return Vec::new(),
        };

        let mut env = Vec::new();
        if let Some(ref url) = self.base_url {
            env.push((format!("{}_BASE_URL", prefix), url.clone()));
        }
        if let Some(ref key) = self.api_key {
            env.push((format!("{}_API_KEY", prefix), key.clone()));
        }
        env
    }
}

/// Configuration for creating a single agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Unique agent identifier within the pool
    pub agent_id: String,

    /// Role template this agent was created from
    pub template_id: String,

    pub model: ModelConfig,

    /// Sandbox directory the agent works in
    pub work_dir: PathBuf,

    /// Role instructions given to the worker on every call
    pub system_prompt: Option<String>,
}

/// Lifecycle state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Ready,
    Working,
    Closed,
}

/// Point-in-time snapshot of an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub template_id: String,
    pub state: AgentState,

    /// Number of completed chat calls
    pub step_count: u32,

    /// Number of progress events emitted so far
    pub event_count: u64,

    pub last_active: Option<DateTime<Utc>>,
}

impl AgentStatus {
    pub fn new(agent_id: impl Into<String>, template_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            template_id: template_id.into(),
            state: AgentState::Ready,
            step_count: 0,
            event_count: 0,
            last_active: None,
        }
    }
}

/// Lifecycle tag of a single tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallState {
    Started,
    Succeeded,
    Failed,
}

impl ToolCallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// A tool invocation observed in a worker's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub state: ToolCallState,
    pub input_preview: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
}

impl ToolCall {
    pub fn started(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: ToolCallState::Started,
            input_preview: None,
            result: None,
        }
    }
}

/// Channels an event subscriber can listen on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventChannel {
    /// Tool activity and text output
    Progress,
    /// Agent lifecycle changes
    Monitor,
}

/// Events emitted by an agent while it works
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ToolStart(ToolCall),
    ToolEnd(ToolCall),
    Text(String),
    StateChanged(AgentState),
}

impl AgentEvent {
    pub fn channel(&self) -> EventChannel {
        match self {
            Self::ToolStart(_) | Self::ToolEnd(_) | Self::Text(_) => EventChannel::Progress,
            Self::StateChanged(_) => EventChannel::Monitor,
        }
    }
}

/// Receiving half of an agent event subscription
pub type EventStream = mpsc::UnboundedReceiver<AgentEvent>;

/// Result of a chat call
#[derive(Debug, Clone)]
pub struct ChatResult {
    pub text: String,
    pub duration: Duration,
}

/// Fan-out of agent events to subscribers
///
/// Subscriptions end when the hub is closed, which drops every sender.
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<(Vec<EventChannel>, mpsc::UnboundedSender<AgentEvent>)>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, channels: &[EventChannel]) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((channels.to_vec(), tx));
        rx
    }

    /// Deliver an event, dropping subscribers whose receiver has gone away
    pub fn publish(&self, event: &AgentEvent) {
        let channel = event.channel();
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|(channels, tx)| {
            if !channels.contains(&channel) {
                return !tx.is_closed();
            }
            tx.send(event.clone()).is_ok()
        });
    }

    pub fn close_all(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// A worker that turns natural-language instructions into text and side effects
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    /// Send an instruction and wait for the worker to finish
    async fn chat(&self, prompt: &str) -> Result<ChatResult, AgentError>;

    /// Subscribe to events on the given channels
    ///
    /// Subscriptions are closed when the current (or next) chat call returns.
    fn subscribe(&self, channels: &[EventChannel]) -> EventStream;

    fn status(&self) -> AgentStatus;

    async fn close(&self) -> Result<(), AgentError>;
}

/// Registry of live agents
#[async_trait]
pub trait AgentPool: Send + Sync {
    async fn create(&self, config: AgentConfig) -> Result<Arc<dyn Agent>, AgentError>;

    fn get(&self, id: &str) -> Option<Arc<dyn Agent>>;

    /// Remove an agent and close it; unknown ids are ignored
    async fn remove(&self, id: &str) -> Result<(), AgentError>;

    fn status(&self, id: &str) -> Result<AgentStatus, AgentError> {
        self.get(id)
            .map(|agent| agent.status())
            .ok_or_else(|| AgentError::not_found(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_config_debug_redacts_key() {
        let mut model = ModelConfig::new("anthropic", "claude-3-haiku-20240307");
        model.api_key = Some("sk-secret".into());

        let debug = format!("{:?}", model);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));

        let json = serde_json::to_string(&model).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn test_provider_env() {
        let mut model = ModelConfig::new("anthropic", "claude");
        model.base_url = Some("http://localhost:8080".into());
        model.api_key = Some("key".into());

        let env = model.provider_env();
        assert!(env.contains(&("ANTHROPIC_BASE_URL".into(), "http://localhost:8080".into())));
        assert!(env.contains(&("ANTHROPIC_API_KEY".into(), "key".into())));

        assert!(ModelConfig::new("local", "llama").provider_env().is_empty());
    }

    #[tokio::test]
    async fn test_event_hub_filters_channels() {
        let hub = EventHub::new();
        let mut progress = hub.subscribe(&[EventChannel::Progress]);
        let mut monitor = hub.subscribe(&[EventChannel::Monitor]);

        hub.publish(&AgentEvent::Text("hello".into()));
        hub.publish(&AgentEvent::StateChanged(AgentState::Working));
        hub.close_all();

        assert_eq!(progress.recv().await, Some(AgentEvent::Text("hello".into())));
        assert_eq!(progress.recv().await, None);

        assert_eq!(
            monitor.recv().await,
            Some(AgentEvent::StateChanged(AgentState::Working))
        );
        assert_eq!(monitor.recv().await, None);
    }

    #[test]
    fn test_event_hub_drops_closed_subscribers() {
        let hub = EventHub::new();
        let rx = hub.subscribe(&[EventChannel::Progress]);
        assert_eq!(hub.subscriber_count(), 1);

        drop(rx);
        hub.publish(&AgentEvent::Text("ignored".into()));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
