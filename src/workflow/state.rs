//! Workflow status records and the table that owns them

use super::deps::WorkflowDependencies;
use super::error::OrchestratorError;
use crate::agent::{AgentStatus, ToolCall, render_value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Pipeline position of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStage {
    Research,
    Writing,
    Editing,
    Complete,
    Failed,
}

impl WorkflowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Writing => "writing",
            Self::Editing => "editing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Research => 0,
            Self::Writing => 1,
            Self::Editing => 2,
            Self::Complete | Self::Failed => 3,
        }
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of entries in a workflow's event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowStart,
    StageStart,
    StageComplete,
    ToolStart,
    ToolEnd,
    WorkflowComplete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStart => "workflow_start",
            Self::StageStart => "stage_start",
            Self::StageComplete => "stage_complete",
            Self::ToolStart => "tool_start",
            Self::ToolEnd => "tool_end",
            Self::WorkflowComplete => "workflow_complete",
        }
    }
}

/// Rendered detail of a finished tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub name: String,
    pub input: String,
    pub output: String,
    pub state: String,
}

impl From<&ToolCall> for ToolCallInfo {
    fn from(call: &ToolCall) -> Self {
        Self {
            name: call.name.clone(),
            input: call.input_preview.as_ref().map(render_value).unwrap_or_default(),
            output: call.result.as_ref().map(render_value).unwrap_or_default(),
            state: call.state.as_str().to_string(),
        }
    }
}

/// One entry of a workflow's timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub time: DateTime<Utc>,

    /// Stage active when the event occurred
    pub stage: WorkflowStage,

    pub event_type: EventType,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallInfo>,
}

impl WorkflowEvent {
    pub fn new(stage: WorkflowStage, event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            stage,
            event_type,
            message: message.into(),
            tool_call: None,
        }
    }

    pub fn with_tool_call(mut self, info: ToolCallInfo) -> Self {
        self.tool_call = Some(info);
        self
    }
}

/// Authoritative status record of one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub workflow_id: String,
    pub stage: WorkflowStage,

    /// 0-100, never decreases while the workflow is alive
    pub progress: u8,

    pub start_time: DateTime<Utc>,

    /// Set once, on the terminal transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub researcher_status: Option<AgentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer_status: Option<AgentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_status: Option<AgentStatus>,

    /// Append-only, in observation order
    pub events: Vec<WorkflowEvent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowStatus {
    /// A fresh record in the research stage with its `workflow_start` event
    pub fn new(workflow_id: impl Into<String>) -> Self {
        let mut status = Self {
            workflow_id: workflow_id.into(),
            stage: WorkflowStage::Research,
            progress: 0,
            start_time: Utc::now(),
            end_time: None,
            researcher_status: None,
            writer_status: None,
            editor_status: None,
            events: Vec::new(),
            error: None,
        };
        status.push_event(WorkflowEvent::new(
            WorkflowStage::Research,
            EventType::WorkflowStart,
            "workflow started",
        ));
        status
    }

    pub fn push_event(&mut self, event: WorkflowEvent) {
        self.events.push(event);
    }

    /// Move to `stage` and raise progress to at least `progress`
    ///
    /// Stages only move forward and progress never drops; terminal records
    /// are left untouched.
    pub fn advance(&mut self, stage: WorkflowStage, progress: u8) {
        if self.stage.is_terminal() || stage.is_terminal() {
            return;
        }
        if stage.rank() >= self.stage.rank() {
            self.stage = stage;
        }
        self.progress = self.progress.max(progress.min(100));
    }

    /// Terminal failure; a second call keeps the first error
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.stage.is_terminal() {
            return;
        }
        self.stage = WorkflowStage::Failed;
        self.error = Some(error.into());
        self.end_time = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        if self.stage.is_terminal() {
            return;
        }
        self.stage = WorkflowStage::Complete;
        self.progress = 100;
        self.end_time = Some(Utc::now());
        self.push_event(WorkflowEvent::new(
            WorkflowStage::Complete,
            EventType::WorkflowComplete,
            "workflow complete",
        ));
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    #[cfg(test)]
    pub fn last_event(&self) -> Option<&WorkflowEvent> {
        self.events.last()
    }
}

/// Table row: the status plus the dependencies once provisioned
#[derive(Debug)]
struct Entry {
    status: WorkflowStatus,
    deps: Option<WorkflowDependencies>,
}

/// Every workflow's status behind one lock
///
/// The lock is never held across an await point.
#[derive(Debug, Clone, Default)]
pub struct WorkflowTable {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl WorkflowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh record, rejecting ids that are already present
    pub fn register(&self, workflow_id: &str) -> Result<(), OrchestratorError> {
        let mut table = self.lock();
        if table.contains_key(workflow_id) {
            return Err(OrchestratorError::AlreadyExists(workflow_id.to_string()));
        }
        table.insert(
            workflow_id.to_string(),
            Entry {
                status: WorkflowStatus::new(workflow_id),
                deps: None,
            },
        );
        Ok(())
    }

    /// Mutate a record in place; returns `None` for unknown ids
    pub fn update<R>(
        &self,
        workflow_id: &str,
        f: impl FnOnce(&mut WorkflowStatus) -> R,
    ) -> Option<R> {
        self.lock()
            .get_mut(workflow_id)
            .map(|entry| f(&mut entry.status))
    }

    /// Append an event observed from a worker
    ///
    /// Stages drain their worker's events before recording an outcome, so
    /// only a stray event arriving after the workflow is terminal is
    /// dropped. Events that trail an earlier stage's `stage_complete` are
    /// kept as they are.
    pub fn append_worker_event(&self, workflow_id: &str, event: WorkflowEvent) -> bool {
        self.update(workflow_id, |status| {
            if status.is_terminal() {
                return false;
            }
            status.push_event(event);
            true
        })
        .unwrap_or(false)
    }

    pub fn set_deps(&self, workflow_id: &str, deps: WorkflowDependencies) {
        if let Some(entry) = self.lock().get_mut(workflow_id) {
            entry.deps = Some(deps);
        }
    }

    /// Dependencies of a provisioned workflow
    pub fn deps(&self, workflow_id: &str) -> Option<WorkflowDependencies> {
        self.lock().get(workflow_id).and_then(|e| e.deps.clone())
    }

    #[cfg(test)]
    pub fn snapshot(&self, workflow_id: &str) -> Option<WorkflowStatus> {
        self.lock().get(workflow_id).map(|e| e.status.clone())
    }

    pub fn contains(&self, workflow_id: &str) -> bool {
        self.lock().contains_key(workflow_id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ToolCallState;
    use serde_json::json;

    #[test]
    fn test_new_status_starts_with_workflow_start() {
        let status = WorkflowStatus::new("w1");
        assert_eq!(status.stage, WorkflowStage::Research);
        assert_eq!(status.progress, 0);
        assert_eq!(status.events.len(), 1);
        assert_eq!(status.events[0].event_type, EventType::WorkflowStart);
        assert!(status.end_time.is_none());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut status = WorkflowStatus::new("w1");
        status.advance(WorkflowStage::Writing, 40);
        status.advance(WorkflowStage::Research, 10);

        assert_eq!(status.stage, WorkflowStage::Writing);
        assert_eq!(status.progress, 40);
    }

    #[test]
    fn test_terminal_is_final() {
        let mut status = WorkflowStatus::new("w1");
        status.advance(WorkflowStage::Editing, 70);
        status.fail("editing stage failed: boom");
        let end = status.end_time;

        status.advance(WorkflowStage::Editing, 100);
        status.complete();
        status.fail("another error");

        assert_eq!(status.stage, WorkflowStage::Failed);
        assert_eq!(status.progress, 70);
        assert_eq!(status.end_time, end);
        assert_eq!(status.error.as_deref(), Some("editing stage failed: boom"));
    }

    #[test]
    fn test_complete_appends_final_event() {
        let mut status = WorkflowStatus::new("w1");
        status.complete();

        assert_eq!(status.progress, 100);
        assert!(status.end_time.is_some());
        assert_eq!(
            status.last_event().map(|e| e.event_type),
            Some(EventType::WorkflowComplete)
        );
    }

    #[test]
    fn test_status_json_shape() {
        let mut status = WorkflowStatus::new("w1");
        status.fail("research stage failed: x");

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["workflow_id"], "w1");
        assert_eq!(value["stage"], "failed");
        assert_eq!(value["events"][0]["event_type"], "workflow_start");
        assert_eq!(value["error"], "research stage failed: x");
        assert!(value.get("researcher_status").is_none());
        assert!(value["events"][0].get("tool_call").is_none());
    }

    #[test]
    fn test_tool_call_info_rendering() {
        let mut call = ToolCall::started("t1", "Write");
        call.state = ToolCallState::Succeeded;
        call.input_preview = Some(json!({"file_path": "outline.md"}));
        call.result = Some(json!("File created"));

        let info = ToolCallInfo::from(&call);
        assert_eq!(info.name, "Write");
        assert!(info.input.contains("outline.md"));
        assert_eq!(info.output, "File created");
        assert_eq!(info.state, "succeeded");

        let bare = ToolCallInfo::from(&ToolCall::started("t2", "Bash"));
        assert_eq!(bare.input, "");
        assert_eq!(bare.output, "");
    }

    #[test]
    fn test_table_register_and_update() {
        let table = WorkflowTable::new();
        table.register("w1").unwrap();

        assert!(matches!(
            table.register("w1"),
            Err(OrchestratorError::AlreadyExists(_))
        ));

        table.update("w1", |s| s.advance(WorkflowStage::Writing, 40));
        assert_eq!(table.snapshot("w1").unwrap().progress, 40);
        assert!(table.update("missing", |s| s.progress).is_none());
        assert!(table.snapshot("missing").is_none());
        assert_eq!(table.ids(), vec!["w1"]);

        assert!(table.deps("w1").is_none());
        let deps = WorkflowDependencies::resolve("w1", std::path::Path::new("/tmp/ws"));
        table.set_deps("w1", deps.clone());
        assert_eq!(table.deps("w1"), Some(deps));
    }

    #[test]
    fn test_worker_events_dropped_after_terminal() {
        let table = WorkflowTable::new();
        table.register("w1").unwrap();

        let event = WorkflowEvent::new(
            WorkflowStage::Research,
            EventType::ToolStart,
            "tool started: Read",
        );
        assert!(table.append_worker_event("w1", event.clone()));

        table.update("w1", |s| s.complete());
        assert!(!table.append_worker_event("w1", event));

        let status = table.snapshot("w1").unwrap();
        assert_eq!(status.events.len(), 3);
        assert_eq!(
            status.last_event().map(|e| e.event_type),
            Some(EventType::WorkflowComplete)
        );
    }

    #[test]
    fn test_event_after_stage_complete_is_kept() {
        let table = WorkflowTable::new();
        table.register("w1").unwrap();

        table.update("w1", |s| {
            s.advance(WorkflowStage::Research, 33);
            s.push_event(WorkflowEvent::new(
                WorkflowStage::Research,
                EventType::StageComplete,
                "outline generated",
            ));
            s.advance(WorkflowStage::Writing, 40);
        });

        let late = WorkflowEvent::new(
            WorkflowStage::Research,
            EventType::ToolEnd,
            "tool finished: Write",
        );
        assert!(table.append_worker_event("w1", late));

        let status = table.snapshot("w1").unwrap();
        assert_eq!(status.stage, WorkflowStage::Writing);
        assert!(status.error.is_none());
        let last = status.last_event().unwrap();
        assert_eq!(last.stage, WorkflowStage::Research);
        assert_eq!(last.event_type, EventType::ToolEnd);
    }
}
