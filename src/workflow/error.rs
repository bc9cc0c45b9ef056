//! Error types for workflow orchestration

use super::deps::Role;
use crate::agent::AgentError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors returned synchronously by the orchestrator
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("workflow already exists: {0}")]
    AlreadyExists(String),

    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("invalid workflow id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("provisioning workflow '{workflow}' failed: {message}")]
    Provisioning { workflow: String, message: String },

    #[error("provisioning workflow '{workflow}' timed out after {after:?}")]
    ProvisionTimeout { workflow: String, after: Duration },

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),
}

/// Why a stage failed
///
/// A worker that answers successfully without producing its artifact is a
/// `MissingArtifact`, never a `Chat` error.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("get {role} agent: {source}")]
    AgentUnavailable { role: Role, source: AgentError },

    #[error("failed to render {role} instruction: {source}")]
    Prompt {
        role: Role,
        source: minijinja::Error,
    },

    #[error("{role} failed: {source}")]
    Chat { role: Role, source: AgentError },

    #[error("{role} timed out after {after:?}")]
    TimedOut { role: Role, after: Duration },

    #[error("{role} did not produce expected artifact {artifact} (looked for {})", path.display())]
    MissingArtifact {
        role: Role,
        artifact: &'static str,
        path: PathBuf,
    },
}

impl StageError {
    /// Short cause label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentUnavailable { .. } => "agent_unavailable",
            Self::Prompt { .. } => "prompt",
            Self::Chat { .. } => "worker_call",
            Self::TimedOut { .. } => "timeout",
            Self::MissingArtifact { .. } => "verification",
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::AgentUnavailable { role, .. }
            | Self::Prompt { role, .. }
            | Self::Chat { role, .. }
            | Self::TimedOut { role, .. }
            | Self::MissingArtifact { role, .. } => *role,
        }
    }
}
