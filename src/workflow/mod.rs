//! Research, write, edit: the document pipeline
//!
//! This module handles:
//! - Workflow registration and status tracking
//! - Provisioning the three workers of a workflow
//! - Running the stages in sequence, each verified by its artifact on disk
//! - Folding worker tool activity into the workflow timeline
//!
//! # Example
//!
//! ```ignore
//! use llm_press::workflow::{OrchestratorOptions, WorkflowOrchestrator};
//!
//! let pool = Arc::new(LocalPool::with_cli_backend(50, BackendConfig::default()));
//! let orchestrator = WorkflowOrchestrator::new(pool, "./workspace", OrchestratorOptions::default());
//!
//! orchestrator.start_workflow("w1", "AI in healthcare", "1000 words", &model).await?;
//!
//! let status = orchestrator.get_workflow_status("w1")?;
//! println!("{} {}%", status.stage, status.progress);
//! ```

mod agents;
mod deps;
mod error;
mod events;
#[cfg(test)]
mod mock;
mod orchestrator;
mod prompts;
mod stages;
mod state;

pub use deps::validate_workflow_id;
pub use orchestrator::{OrchestratorOptions, WorkflowOrchestrator};
pub use stages::{STAGES, read_artifacts};
pub use state::{EventType, WorkflowEvent, WorkflowStatus};

#[cfg(test)]
pub use state::{ToolCallInfo, WorkflowStage};
