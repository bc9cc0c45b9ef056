//! Scripted agents for orchestrator tests

use crate::agent::{
    Agent, AgentConfig, AgentError, AgentEvent, AgentFactory, AgentState, AgentStatus, ChatResult,
    EventChannel, EventHub, EventStream, LocalPool, ToolCall, ToolCallState,
};
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a mock worker does when asked to chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Write the role's artifact and answer
    Write,
    /// Answer as if the file was written, without writing it
    Silent,
    /// Fail the call
    Fail,
    Panic,
    /// Never answer
    Hang,
}

pub struct MockAgent {
    id: String,
    template_id: String,
    work_dir: PathBuf,
    script: Script,
    hub: EventHub,
    status: Mutex<AgentStatus>,
}

impl MockAgent {
    pub fn new(config: AgentConfig, script: Script) -> Self {
        Self {
            status: Mutex::new(AgentStatus::new(&config.agent_id, &config.template_id)),
            id: config.agent_id,
            template_id: config.template_id,
            work_dir: config.work_dir,
            script,
            hub: EventHub::new(),
        }
    }

    fn artifact(&self) -> &'static str {
        match self.template_id.as_str() {
            "researcher" => "outline.md",
            "writer" => "draft.md",
            _ => "final.md",
        }
    }

    fn tool_end(&self, state: ToolCallState) -> AgentEvent {
        let mut call = ToolCall::started("call-1", "Write");
        call.state = state;
        call.input_preview = Some(json!({ "file_path": self.artifact() }));
        call.result = Some(json!("done"));
        AgentEvent::ToolEnd(call)
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn chat(&self, prompt: &str) -> Result<ChatResult, AgentError> {
        let file = self.artifact();
        self.hub
            .publish(&AgentEvent::ToolStart(ToolCall::started("call-1", "Write")));

        let outcome = match self.script {
            Script::Write => {
                let content = format!("# {}\n\n{}\n", file, prompt);
                tokio::fs::write(self.work_dir.join(file), content)
                    .await
                    .map_err(|e| AgentError::io(e.to_string()))
                    .map(|_| format!("Saved {}", file))
            }
            Script::Silent => Ok(format!("I have saved the content to {}", file)),
            Script::Fail => Err(AgentError::Reported {
                message: "model unavailable".into(),
            }),
            Script::Panic => panic!("worker exploded"),
            Script::Hang => {
                std::future::pending::<()>().await;
                Ok(String::new())
            }
        };

        let state = if outcome.is_ok() {
            ToolCallState::Succeeded
        } else {
            ToolCallState::Failed
        };
        self.hub.publish(&self.tool_end(state));
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .step_count += 1;
        self.hub.close_all();

        outcome.map(|text| ChatResult {
            text,
            duration: Duration::ZERO,
        })
    }

    fn subscribe(&self, channels: &[EventChannel]) -> EventStream {
        self.hub.subscribe(channels)
    }

    fn status(&self) -> AgentStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn close(&self) -> Result<(), AgentError> {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).state = AgentState::Closed;
        self.hub.close_all();
        Ok(())
    }
}

/// Pool whose agents follow the script chosen for their template
pub fn pool(script_for: impl Fn(&str) -> Script + Send + Sync + 'static) -> Arc<LocalPool> {
    pool_with_capacity(50, script_for)
}

pub fn pool_with_capacity(
    capacity: usize,
    script_for: impl Fn(&str) -> Script + Send + Sync + 'static,
) -> Arc<LocalPool> {
    scripted_pool(capacity, move |config| script_for(&config.template_id))
}

/// Pool scripted per agent id, for runs mixing several workflows
pub fn pool_by_agent(script_for: impl Fn(&str) -> Script + Send + Sync + 'static) -> Arc<LocalPool> {
    scripted_pool(50, move |config| script_for(&config.agent_id))
}

fn scripted_pool(
    capacity: usize,
    script_for: impl Fn(&AgentConfig) -> Script + Send + Sync + 'static,
) -> Arc<LocalPool> {
    let factory: AgentFactory = Arc::new(move |config: AgentConfig| {
        let script = script_for(&config);
        let agent: Arc<dyn Agent> = Arc::new(MockAgent::new(config, script));
        Ok(agent)
    });
    Arc::new(LocalPool::new(capacity, factory))
}

/// Pool where every worker does its job
pub fn happy_pool() -> Arc<LocalPool> {
    pool(|_| Script::Write)
}
