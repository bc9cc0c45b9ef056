//! Output handlers for CLI commands
//!
//! Supports console (pretty), JSON, and quiet output modes.

use crate::workflow::{EventType, WorkflowEvent};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

/// Events emitted while a command runs
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    WorkflowStart {
        workflow_id: String,
        topic: String,
        work_dir: PathBuf,
    },
    /// A new entry in the workflow timeline
    Timeline {
        progress: u8,
        event: WorkflowEvent,
    },
    WorkflowComplete {
        workflow_id: String,
        success: bool,
        duration_ms: u64,
        artifacts: Vec<PathBuf>,
    },
    WorkflowError {
        error: String,
    },
    Artifacts {
        workflow_id: String,
        artifacts: BTreeMap<String, String>,
    },
    Info {
        message: String,
    },
    Debug {
        message: String,
    },
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    /// Emit an event
    fn emit(&self, event: OutputEvent);

    /// Write final result
    fn result(&self, success: bool, output: Option<&str>);
}

/// Console output handler
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    /// Create a new console handler
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn format_duration(ms: u64) -> String {
        if ms < 1000 {
            format!("{}ms", ms)
        } else if ms < 60_000 {
            format!("{:.1}s", ms as f64 / 1000.0)
        } else {
            format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
        }
    }

    fn format_timeline(&self, progress: u8, event: &WorkflowEvent) -> Option<String> {
        let line = match event.event_type {
            EventType::ToolStart if !self.debug => return None,
            EventType::ToolStart => format!("      {}", event.message),
            EventType::ToolEnd => match &event.tool_call {
                Some(call) if call.state == "failed" => {
                    format!("      ✗ {} ({})", event.message, call.state)
                }
                _ => format!("      {}", event.message),
            },
            EventType::StageComplete => format!("[{:>3}%] ✓ {}", progress, event.message),
            _ => format!("[{:>3}%] {}", progress, event.message),
        };
        Some(line)
    }
}

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: OutputEvent) {
        match event {
            OutputEvent::WorkflowStart {
                workflow_id,
                topic,
                work_dir,
            } => {
                eprintln!("Starting workflow '{}': {}", workflow_id, topic);
                eprintln!("  workspace: {}", work_dir.display());
            }
            OutputEvent::Timeline { progress, event } => {
                if let Some(line) = self.format_timeline(progress, &event) {
                    eprintln!("{}", line);
                }
            }
            OutputEvent::WorkflowComplete {
                workflow_id,
                success,
                duration_ms,
                artifacts,
            } => {
                eprintln!();
                if success {
                    eprintln!(
                        "✓ Workflow '{}' completed in {}",
                        workflow_id,
                        Self::format_duration(duration_ms)
                    );
                } else {
                    eprintln!(
                        "✗ Workflow '{}' failed after {}",
                        workflow_id,
                        Self::format_duration(duration_ms)
                    );
                }
                for path in artifacts {
                    eprintln!("  {}", path.display());
                }
            }
            OutputEvent::WorkflowError { error } => {
                eprintln!("Error: {}", error);
            }
            OutputEvent::Artifacts { artifacts, .. } => {
                for (name, content) in artifacts {
                    println!("===== {} =====", name);
                    println!("{}", content.trim_end());
                    println!();
                }
            }
            OutputEvent::Info { message } => {
                eprintln!("{}", message);
            }
            OutputEvent::Debug { message } => {
                if self.debug {
                    eprintln!("[debug] {}", message);
                }
            }
        }
    }

    fn result(&self, _success: bool, output: Option<&str>) {
        if let Some(out) = output {
            println!("{}", out);
        }
    }
}

/// JSON output handler
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    /// Create a new JSON handler
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        if let Ok(s) = json {
            println!("{}", s);
        }
    }
}

impl OutputHandler for JsonHandler {
    fn emit(&self, event: OutputEvent) {
        self.print_json(&event);
    }

    fn result(&self, success: bool, output: Option<&str>) {
        #[derive(Serialize)]
        struct FinalResult<'a> {
            success: bool,
            output: Option<&'a str>,
        }

        self.print_json(&FinalResult { success, output });
    }
}

/// Quiet handler that emits nothing
pub struct QuietHandler;

impl OutputHandler for QuietHandler {
    fn emit(&self, _event: OutputEvent) {}
    fn result(&self, _success: bool, output: Option<&str>) {
        // Only print final output, nothing else
        if let Some(out) = output {
            println!("{}", out);
        }
    }
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> Box<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Box::new(ConsoleHandler::new(debug)),
        // One object per line
        OutputMode::Json => Box::new(JsonHandler::new(false)),
        OutputMode::Quiet => Box::new(QuietHandler),
    }
}
