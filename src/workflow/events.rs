//! Folds a worker's progress stream into the workflow timeline

use super::state::{EventType, ToolCallInfo, WorkflowEvent, WorkflowStage, WorkflowTable};
use crate::agent::{AgentEvent, EventStream};
use tokio::task::JoinHandle;

/// Translate a worker event into a timeline entry
///
/// Only tool activity is recorded; every other kind is ignored.
pub fn translate(stage: WorkflowStage, event: &AgentEvent) -> Option<WorkflowEvent> {
    match event {
        AgentEvent::ToolStart(call) => Some(WorkflowEvent::new(
            stage,
            EventType::ToolStart,
            format!("tool started: {}", call.name),
        )),
        AgentEvent::ToolEnd(call) => Some(
            WorkflowEvent::new(
                stage,
                EventType::ToolEnd,
                format!("tool finished: {}", call.name),
            )
            .with_tool_call(ToolCallInfo::from(call)),
        ),
        _ => None,
    }
}

/// Drain `events` into the workflow's log until the worker closes the stream
///
/// The task resolves to the number of events recorded.
pub fn spawn_aggregator(
    table: WorkflowTable,
    workflow_id: String,
    stage: WorkflowStage,
    mut events: EventStream,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut recorded = 0;

        while let Some(event) = events.recv().await {
            let Some(entry) = translate(stage, &event) else {
                continue;
            };

            if let AgentEvent::ToolStart(call) | AgentEvent::ToolEnd(call) = &event {
                tracing::debug!(
                    workflow = %workflow_id,
                    stage = %stage,
                    tool = %call.name,
                    kind = entry.event_type.as_str(),
                    state = call.state.as_str(),
                    "tool event"
                );
            }

            if table.append_worker_event(&workflow_id, entry) {
                recorded += 1;
            } else {
                tracing::debug!(workflow = %workflow_id, stage = %stage, "late tool event dropped");
            }
        }

        tracing::trace!(workflow = %workflow_id, stage = %stage, recorded, "event stream closed");
        recorded
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentState, ToolCall, ToolCallState};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn finished(name: &str) -> ToolCall {
        let mut call = ToolCall::started("t1", name);
        call.state = ToolCallState::Succeeded;
        call.input_preview = Some(json!({"file_path": "draft.md"}));
        call.result = Some(json!("ok"));
        call
    }

    #[test]
    fn test_translate_tool_events() {
        let start = translate(
            WorkflowStage::Writing,
            &AgentEvent::ToolStart(ToolCall::started("t1", "Read")),
        )
        .unwrap();
        assert_eq!(start.event_type, EventType::ToolStart);
        assert_eq!(start.message, "tool started: Read");
        assert_eq!(start.stage, WorkflowStage::Writing);
        assert!(start.tool_call.is_none());

        let end = translate(WorkflowStage::Writing, &AgentEvent::ToolEnd(finished("Write"))).unwrap();
        assert_eq!(end.event_type, EventType::ToolEnd);
        let info = end.tool_call.unwrap();
        assert_eq!(info.name, "Write");
        assert_eq!(info.output, "ok");
        assert_eq!(info.state, "succeeded");
    }

    #[test]
    fn test_other_events_ignored() {
        assert!(translate(WorkflowStage::Research, &AgentEvent::Text("hi".into())).is_none());
        assert!(
            translate(
                WorkflowStage::Research,
                &AgentEvent::StateChanged(AgentState::Working)
            )
            .is_none()
        );
    }

    #[tokio::test]
    async fn test_aggregator_appends_in_order_and_stops_on_close() {
        let table = WorkflowTable::new();
        table.register("w1").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_aggregator(table.clone(), "w1".into(), WorkflowStage::Research, rx);

        tx.send(AgentEvent::ToolStart(ToolCall::started("t1", "Write"))).unwrap();
        tx.send(AgentEvent::Text("thinking".into())).unwrap();
        tx.send(AgentEvent::ToolEnd(finished("Write"))).unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), 2);

        let events = table.snapshot("w1").unwrap().events;
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![EventType::WorkflowStart, EventType::ToolStart, EventType::ToolEnd]
        );
    }
}
