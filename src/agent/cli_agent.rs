//! Agent backed by an agentic CLI process

use super::stream_parser::{FinalResult, StreamParser};
use super::types::{
    Agent, AgentConfig, AgentError, AgentEvent, AgentState, AgentStatus, ChatResult,
    EventChannel, EventHub, EventStream, ModelConfig,
};
use crate::config::BackendConfig;
use crate::process::{drain_stderr, exit_status_code, kill_and_reap, tail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Worker that runs one CLI process per chat call inside its sandbox directory
pub struct CliAgent {
    id: String,
    template_id: String,
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    timeout: Duration,
    work_dir: PathBuf,
    model: ModelConfig,
    model_flag: String,
    system_prompt_flag: String,
    system_prompt: Option<String>,
    hub: EventHub,
    status: Mutex<AgentStatus>,

    /// Serializes chat calls on the same agent
    call_lock: tokio::sync::Mutex<()>,
}

impl CliAgent {
    pub fn new(config: AgentConfig, backend: &BackendConfig) -> Self {
        let status = AgentStatus::new(&config.agent_id, &config.template_id);
        Self {
            id: config.agent_id,
            template_id: config.template_id,
            command: backend.command.clone(),
            args: backend.args.clone(),
            env: backend
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            timeout: Duration::from_secs(backend.timeout),
            work_dir: config.work_dir,
            model: config.model,
            model_flag: backend.model_flag.clone(),
            system_prompt_flag: backend.system_prompt_flag.clone(),
            system_prompt: config.system_prompt,
            hub: EventHub::new(),
            status: Mutex::new(status),
            call_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[cfg(all(test, unix))]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check whether the backend command can be found
    pub async fn is_available(command: &str) -> bool {
        Command::new("which")
            .arg(command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn build_command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);

        if !self.model_flag.is_empty() && !self.model.model.is_empty() {
            cmd.arg(&self.model_flag).arg(&self.model.model);
        }
        if let Some(ref system_prompt) = self.system_prompt {
            if !self.system_prompt_flag.is_empty() {
                cmd.arg(&self.system_prompt_flag).arg(system_prompt);
            }
        }

        for (key, value) in self.model.provider_env() {
            cmd.env(key, value);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        // The instruction is always the final argument
        cmd.arg(prompt);

        cmd.current_dir(&self.work_dir);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        cmd
    }

    fn is_closed(&self) -> bool {
        self.lock_status().state == AgentState::Closed
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, AgentStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: AgentState) {
        {
            let mut status = self.lock_status();
            if status.state == AgentState::Closed {
                return;
            }
            status.state = state;
        }
        self.hub.publish(&AgentEvent::StateChanged(state));
    }

    fn record_event(&self, event: &AgentEvent) {
        self.lock_status().event_count += 1;
        self.hub.publish(event);
    }

    async fn run(&self, prompt: &str) -> Result<ChatResult, AgentError> {
        let start = Instant::now();
        let mut cmd = self.build_command(prompt);

        tracing::debug!(
            agent = %self.id,
            role = %self.template_id,
            command = %self.command,
            dir = %self.work_dir.display(),
            prompt_len = prompt.len(),
            "spawning worker"
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::spawn(&self.command, e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::io("worker stdout was not captured"))?;
        let stderr_task = drain_stderr(child.stderr.take());

        let mut lines = BufReader::new(stdout).lines();
        let mut parser = StreamParser::new();
        let mut text_lines = Vec::new();
        let mut final_result: Option<FinalResult> = None;

        let streamed = tokio::time::timeout(self.timeout, async {
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| AgentError::io(format!("stdout read error: {}", e)))?
            {
                let parsed = parser.parse_line(&line);
                for event in &parsed.events {
                    if let AgentEvent::Text(text) = event {
                        text_lines.push(text.clone());
                    }
                    self.record_event(event);
                }
                if parsed.result.is_some() {
                    final_result = parsed.result;
                }
            }

            child
                .wait()
                .await
                .map_err(|e| AgentError::io(format!("failed to wait for worker: {}", e)))
        })
        .await;

        let elapsed = start.elapsed();

        match streamed {
            Ok(Ok(status)) => {
                let stderr = stderr_task.await.unwrap_or_default();

                if !status.success() {
                    return Err(AgentError::ExecutionFailed {
                        exit_code: exit_status_code(&status),
                        stderr: tail(&stderr),
                    });
                }

                if parser.unfinished() > 0 {
                    tracing::debug!(
                        agent = %self.id,
                        unfinished = parser.unfinished(),
                        "worker exited with tool calls still open"
                    );
                }

                match final_result {
                    Some(FinalResult {
                        is_error: true,
                        text,
                    }) => Err(AgentError::Reported { message: text }),
                    Some(result) => Ok(ChatResult {
                        text: result.text,
                        duration: elapsed,
                    }),
                    None => Ok(ChatResult {
                        text: text_lines.join("\n"),
                        duration: elapsed,
                    }),
                }
            }
            Ok(Err(e)) => {
                kill_and_reap(&mut child).await;
                Err(e)
            }
            Err(_) => {
                let exit_code = kill_and_reap(&mut child).await;
                tracing::warn!(agent = %self.id, ?elapsed, ?exit_code, "worker call timed out");
                Err(AgentError::Timeout { elapsed })
            }
        }
    }
}

/// Marks the agent busy for the duration of a call and ends its subscriptions afterwards
struct CallGuard<'a> {
    agent: &'a CliAgent,
}

impl<'a> CallGuard<'a> {
    fn begin(agent: &'a CliAgent) -> Self {
        agent.set_state(AgentState::Working);
        Self { agent }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        {
            let mut status = self.agent.lock_status();
            status.step_count += 1;
            status.last_active = Some(chrono::Utc::now());
        }
        self.agent.set_state(AgentState::Ready);
        self.agent.hub.close_all();
    }
}

#[async_trait]
impl Agent for CliAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn chat(&self, prompt: &str) -> Result<ChatResult, AgentError> {
        if self.is_closed() {
            return Err(AgentError::Closed {
                id: self.id.clone(),
            });
        }

        let _serial = self.call_lock.lock().await;
        let _call = CallGuard::begin(self);
        self.run(prompt).await
    }

    fn subscribe(&self, channels: &[EventChannel]) -> EventStream {
        self.hub.subscribe(channels)
    }

    fn status(&self) -> AgentStatus {
        self.lock_status().clone()
    }

    async fn close(&self) -> Result<(), AgentError> {
        self.set_state(AgentState::Closed);
        self.hub.close_all();
        Ok(())
    }
}
