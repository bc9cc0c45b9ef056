//! Stage executors with verification-by-artifact
//!
//! A worker's reply is never taken as proof of work. After every call the
//! stage checks that its artifact exists on disk and is non-empty.

use super::agents::WorkflowAgents;
use super::deps::{Role, WorkflowDependencies};
use super::error::StageError;
use super::events::spawn_aggregator;
use super::prompts::PromptRenderer;
use super::state::{EventType, WorkflowEvent, WorkflowStage, WorkflowTable};
use crate::agent::EventChannel;
use crate::process::preview;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;

const PROMPT_PREVIEW_CHARS: usize = 200;
const RESPONSE_PREVIEW_CHARS: usize = 500;

/// Static description of one pipeline stage
#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    pub stage: WorkflowStage,
    pub role: Role,

    /// Progress when the stage starts
    pub floor: u8,
    /// Progress once the artifact is verified
    pub done: u8,

    /// File the worker reads, relative to its sandbox
    pub input: &'static str,
    /// File the worker writes, relative to its sandbox
    pub output: &'static str,

    /// Artifact map key
    pub key: &'static str,

    pub start_message: &'static str,
    pub done_message: &'static str,
}

impl StageSpec {
    /// Artifact path relative to the workflow working directory
    pub fn artifact(&self) -> String {
        format!("{}/{}", self.role.subdir(), self.output)
    }

    pub fn artifact_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(self.role.subdir()).join(self.output)
    }
}

/// The pipeline, in execution order
pub const STAGES: [StageSpec; 3] = [
    StageSpec {
        stage: WorkflowStage::Research,
        role: Role::Researcher,
        floor: 10,
        done: 33,
        input: "",
        output: "outline.md",
        key: "outline",
        start_message: "researcher is analysing the topic",
        done_message: "outline generated",
    },
    StageSpec {
        stage: WorkflowStage::Writing,
        role: Role::Writer,
        floor: 40,
        done: 66,
        input: "../research/outline.md",
        output: "draft.md",
        key: "draft",
        start_message: "writer is drafting",
        done_message: "draft completed",
    },
    StageSpec {
        stage: WorkflowStage::Editing,
        role: Role::Editor,
        floor: 70,
        done: 100,
        input: "../writing/draft.md",
        output: "final.md",
        key: "final",
        start_message: "editor is reviewing",
        done_message: "final document completed",
    },
];

/// Everything a stage needs from its workflow
pub struct StageContext<'a> {
    pub workflow_id: &'a str,
    pub topic: &'a str,
    pub requirements: &'a str,
    pub deps: &'a WorkflowDependencies,
    pub agents: &'a WorkflowAgents,
    pub table: &'a WorkflowTable,
    pub prompts: &'a PromptRenderer,
    pub stage_timeout: Option<Duration>,
}

/// Drive one stage: instruct the worker, then verify its artifact
pub async fn execute_stage(ctx: &StageContext<'_>, spec: &StageSpec) -> Result<(), StageError> {
    let role = spec.role;
    tracing::info!(workflow = %ctx.workflow_id, stage = %spec.stage, "stage started");

    ctx.table.update(ctx.workflow_id, |status| {
        status.advance(spec.stage, spec.floor);
        status.push_event(WorkflowEvent::new(
            spec.stage,
            EventType::StageStart,
            spec.start_message,
        ));
    });

    let agent = ctx
        .agents
        .get_agent(ctx.deps.agent_id(role))
        .map_err(|source| StageError::AgentUnavailable { role, source })?;

    let prompt = ctx
        .prompts
        .instruction(role, ctx.topic, ctx.requirements, spec.input, spec.output)
        .map_err(|source| StageError::Prompt { role, source })?;

    // Subscribe before the call so no early event is missed
    let events = agent.subscribe(&[EventChannel::Progress]);
    let aggregator = spawn_aggregator(
        ctx.table.clone(),
        ctx.workflow_id.to_string(),
        spec.stage,
        events,
    );

    tracing::debug!(
        workflow = %ctx.workflow_id,
        agent = %agent.id(),
        len = prompt.len(),
        prompt = %preview(&prompt, PROMPT_PREVIEW_CHARS),
        "sending instruction"
    );

    let call = agent.chat(&prompt);
    let outcome = match ctx.stage_timeout {
        Some(after) => match tokio::time::timeout(after, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                aggregator.abort();
                return Err(StageError::TimedOut { role, after });
            }
        },
        None => call.await,
    };

    // The stream closes when chat returns; the stage's tool events land
    // before its outcome is recorded
    drain_events(ctx, spec, aggregator).await;
    let result = outcome.map_err(|source| StageError::Chat { role, source })?;

    tracing::debug!(
        workflow = %ctx.workflow_id,
        agent = %agent.id(),
        len = result.text.len(),
        elapsed_ms = result.duration.as_millis() as u64,
        response = %preview(&result.text, RESPONSE_PREVIEW_CHARS),
        "worker replied"
    );

    verify_artifact(ctx, spec).await?;

    ctx.table.update(ctx.workflow_id, |status| {
        status.advance(spec.stage, spec.done);
        status.push_event(WorkflowEvent::new(
            spec.stage,
            EventType::StageComplete,
            spec.done_message,
        ));
    });

    tracing::info!(workflow = %ctx.workflow_id, stage = %spec.stage, "stage completed");
    Ok(())
}

async fn drain_events(ctx: &StageContext<'_>, spec: &StageSpec, aggregator: JoinHandle<usize>) {
    match aggregator.await {
        Ok(recorded) => tracing::debug!(
            workflow = %ctx.workflow_id,
            stage = %spec.stage,
            recorded,
            "tool events recorded"
        ),
        Err(e) => tracing::warn!(
            workflow = %ctx.workflow_id,
            stage = %spec.stage,
            error = %e,
            "event aggregator ended abnormally"
        ),
    }
}

async fn verify_artifact(ctx: &StageContext<'_>, spec: &StageSpec) -> Result<(), StageError> {
    let path = spec.artifact_path(&ctx.deps.work_dir);

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {
            tracing::info!(
                workflow = %ctx.workflow_id,
                path = %path.display(),
                bytes = meta.len(),
                "artifact verified"
            );
            return Ok(());
        }
        Ok(meta) => {
            tracing::warn!(
                workflow = %ctx.workflow_id,
                path = %path.display(),
                bytes = meta.len(),
                "artifact is empty or not a file"
            );
        }
        Err(e) => {
            tracing::warn!(
                workflow = %ctx.workflow_id,
                path = %path.display(),
                error = %e,
                "artifact missing"
            );
        }
    }

    let sandbox = ctx.deps.sandbox(spec.role);
    let found = list_dir(&sandbox).await;
    tracing::warn!(
        workflow = %ctx.workflow_id,
        dir = %sandbox.display(),
        files = ?found,
        "files present in sandbox"
    );

    Err(StageError::MissingArtifact {
        role: spec.role,
        artifact: spec.output,
        path,
    })
}

async fn list_dir(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return names;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    names
}

/// Read whichever stage artifacts exist under `work_dir`
///
/// Unreadable or missing files are left out of the map.
pub async fn read_artifacts(work_dir: &Path) -> BTreeMap<String, String> {
    let mut artifacts = BTreeMap::new();

    for spec in &STAGES {
        let path = spec.artifact_path(work_dir);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                artifacts.insert(spec.key.to_string(), content);
            }
            Err(e) => {
                tracing::trace!(path = %path.display(), error = %e, "artifact not readable");
            }
        }
    }

    artifacts
}
