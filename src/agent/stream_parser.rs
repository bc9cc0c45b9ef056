//! Parse streamed worker output into agent events
//!
//! Agentic CLIs in stream-json mode print one JSON record per line:
//! assistant messages carry text and `tool_use` blocks, user messages carry
//! `tool_result` blocks, and a final `result` record carries the answer.
//! Lines that are not JSON are treated as plain text output.

use super::types::{AgentEvent, ToolCall, ToolCallState};
use serde_json::Value;
use std::collections::HashMap;

/// Final answer reported by the worker
#[derive(Debug, Clone, PartialEq)]
pub struct FinalResult {
    pub text: String,
    pub is_error: bool,
}

/// Everything recognised on one output line
#[derive(Debug, Default)]
pub struct ParsedLine {
    pub events: Vec<AgentEvent>,
    pub result: Option<FinalResult>,
}

/// Stateful parser that pairs tool results with the calls that started them
#[derive(Debug, Default)]
pub struct StreamParser {
    pending: HashMap<String, ToolCall>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single line of worker output
    pub fn parse_line(&mut self, line: &str) -> ParsedLine {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ParsedLine::default();
        }

        let record: Value = match serde_json::from_str(trimmed) {
            Ok(value @ Value::Object(_)) => value,
            _ => {
                return ParsedLine {
                    events: vec![AgentEvent::Text(line.to_string())],
                    result: None,
                };
            }
        };

        match record.get("type").and_then(Value::as_str) {
            Some("assistant") => ParsedLine {
                events: self.assistant_events(&record),
                result: None,
            },
            Some("user") => ParsedLine {
                events: self.tool_results(&record),
                result: None,
            },
            Some("result") => ParsedLine {
                events: Vec::new(),
                result: Some(final_result(&record)),
            },
            _ => ParsedLine::default(),
        }
    }

    /// Tool calls that started but never reported a result
    pub fn unfinished(&self) -> usize {
        self.pending.len()
    }

    fn assistant_events(&mut self, record: &Value) -> Vec<AgentEvent> {
        let mut events = Vec::new();

        for block in content_blocks(record) {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        events.push(AgentEvent::Text(text.to_string()));
                    }
                }
                Some("tool_use") => {
                    let id = str_field(block, "id");
                    let mut call = ToolCall::started(id.clone(), str_field(block, "name"));
                    call.input_preview = block.get("input").cloned();

                    self.pending.insert(id, call.clone());
                    events.push(AgentEvent::ToolStart(call));
                }
                _ => {}
            }
        }

        events
    }

    fn tool_results(&mut self, record: &Value) -> Vec<AgentEvent> {
        let mut events = Vec::new();

        for block in content_blocks(record) {
            if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                continue;
            }

            let id = str_field(block, "tool_use_id");
            let mut call = self
                .pending
                .remove(&id)
                .unwrap_or_else(|| ToolCall::started(id.clone(), "unknown"));

            let is_error = block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            call.state = if is_error {
                ToolCallState::Failed
            } else {
                ToolCallState::Succeeded
            };
            call.result = block.get("content").cloned();

            events.push(AgentEvent::ToolEnd(call));
        }

        events
    }
}

fn content_blocks(record: &Value) -> impl Iterator<Item = &Value> {
    record
        .pointer("/message/content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn str_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn final_result(record: &Value) -> FinalResult {
    let is_error = record
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || record
            .get("subtype")
            .and_then(Value::as_str)
            .is_some_and(|s| s != "success");

    FinalResult {
        text: str_field(record, "result"),
        is_error,
    }
}

/// Render a JSON value for display, keeping strings unquoted
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) if items.iter().all(|i| i.get("text").is_some()) => items
            .iter()
            .filter_map(|i| i.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text_line() {
        let mut parser = StreamParser::new();
        let parsed = parser.parse_line("just some output");

        assert_eq!(
            parsed.events,
            vec![AgentEvent::Text("just some output".into())]
        );
        assert!(parsed.result.is_none());
    }

    #[test]
    fn test_tool_use_and_result_are_paired() {
        let mut parser = StreamParser::new();

        let start = json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "text", "text": "Saving the outline"},
                {"type": "tool_use", "id": "toolu_1", "name": "Write",
                 "input": {"file_path": "outline.md"}}
            ]}
        });
        let parsed = parser.parse_line(&start.to_string());
        assert_eq!(parsed.events.len(), 2);
        assert!(matches!(
            &parsed.events[1],
            AgentEvent::ToolStart(call) if call.name == "Write" && call.state == ToolCallState::Started
        ));
        assert_eq!(parser.unfinished(), 1);

        let end = json!({
            "type": "user",
            "message": {"content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "File created"}
            ]}
        });
        let parsed = parser.parse_line(&end.to_string());
        match &parsed.events[..] {
            [AgentEvent::ToolEnd(call)] => {
                assert_eq!(call.name, "Write");
                assert_eq!(call.state, ToolCallState::Succeeded);
                assert_eq!(call.input_preview, Some(json!({"file_path": "outline.md"})));
                assert_eq!(call.result, Some(json!("File created")));
            }
            other => panic!("unexpected events: {:?}", other),
        }
        assert_eq!(parser.unfinished(), 0);
    }

    #[test]
    fn test_failed_tool_result() {
        let mut parser = StreamParser::new();
        let end = json!({
            "type": "user",
            "message": {"content": [
                {"type": "tool_result", "tool_use_id": "missing", "content": "denied", "is_error": true}
            ]}
        });

        let parsed = parser.parse_line(&end.to_string());
        match &parsed.events[..] {
            [AgentEvent::ToolEnd(call)] => {
                assert_eq!(call.name, "unknown");
                assert_eq!(call.state, ToolCallState::Failed);
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_result_record() {
        let mut parser = StreamParser::new();
        let parsed = parser.parse_line(
            r#"{"type":"result","subtype":"success","is_error":false,"result":"Done."}"#,
        );
        assert_eq!(
            parsed.result,
            Some(FinalResult {
                text: "Done.".into(),
                is_error: false
            })
        );

        let parsed = parser.parse_line(r#"{"type":"result","subtype":"error_max_turns"}"#);
        assert!(parsed.result.unwrap().is_error);
    }

    #[test]
    fn test_unknown_records_ignored() {
        let mut parser = StreamParser::new();
        let parsed = parser.parse_line(r#"{"type":"system","subtype":"init"}"#);
        assert!(parsed.events.is_empty());
        assert!(parsed.result.is_none());

        assert!(parser.parse_line("   ").events.is_empty());
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&json!("plain")), "plain");
        assert_eq!(render_value(&json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(
            render_value(&json!([{"type": "text", "text": "one"}, {"type": "text", "text": "two"}])),
            "one\ntwo"
        );
    }
}
