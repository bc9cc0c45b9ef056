//! Mapping from a workflow id to its workers and working directory

use super::error::OrchestratorError;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Subdirectory reserved for material shared between workers
pub const SHARED_DIR: &str = "shared";

const MAX_ID_LEN: usize = 128;

static WORKFLOW_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap_or_else(|e| panic!("invalid id pattern: {e}"))
});

/// The three worker roles of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Researcher,
    Writer,
    Editor,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Researcher, Role::Writer, Role::Editor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researcher => "researcher",
            Self::Writer => "writer",
            Self::Editor => "editor",
        }
    }

    /// Template the agent is created from
    pub fn template_id(&self) -> &'static str {
        self.as_str()
    }

    /// Sandbox subdirectory of the workflow working directory
    pub fn subdir(&self) -> &'static str {
        match self {
            Self::Researcher => "research",
            Self::Writer => "writing",
            Self::Editor => "editing",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workers and directory owned by one workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowDependencies {
    pub researcher_id: String,
    pub writer_id: String,
    pub editor_id: String,
    pub work_dir: PathBuf,
}

impl WorkflowDependencies {
    /// Derive worker ids and the working directory for a workflow
    pub fn resolve(workflow_id: &str, workspace_root: &Path) -> Self {
        Self {
            researcher_id: format!("{}-researcher", workflow_id),
            writer_id: format!("{}-writer", workflow_id),
            editor_id: format!("{}-editor", workflow_id),
            work_dir: workspace_root.join(workflow_id),
        }
    }

    pub fn agent_id(&self, role: Role) -> &str {
        match role {
            Role::Researcher => &self.researcher_id,
            Role::Writer => &self.writer_id,
            Role::Editor => &self.editor_id,
        }
    }

    /// Sandbox directory of a role's worker
    pub fn sandbox(&self, role: Role) -> PathBuf {
        self.work_dir.join(role.subdir())
    }

    pub fn agent_ids(&self) -> [&str; 3] {
        [&self.researcher_id, &self.writer_id, &self.editor_id]
    }
}

/// Reject ids that can't be used as a directory name and agent id prefix
pub fn validate_workflow_id(id: &str) -> Result<(), OrchestratorError> {
    let reason = if id.is_empty() {
        "must not be empty"
    } else if id.len() > MAX_ID_LEN {
        "longer than 128 characters"
    } else if !WORKFLOW_ID.is_match(id) || id.contains("..") {
        "only letters, digits, '-', '_' and '.' are allowed"
    } else {
        return Ok(());
    };

    Err(OrchestratorError::InvalidId {
        id: id.to_string(),
        reason: reason.to_string(),
    })
}

/// Create the stage directories plus `shared/`, then confirm they all exist
pub async fn ensure_workspace_dirs(work_dir: &Path) -> std::io::Result<()> {
    let dirs = Role::ALL
        .iter()
        .map(|role| role.subdir())
        .chain(std::iter::once(SHARED_DIR));

    for dir in dirs {
        let path = work_dir.join(dir);
        tokio::fs::create_dir_all(&path).await.map_err(|e| {
            std::io::Error::new(e.kind(), format!("create dir {}: {}", path.display(), e))
        })?;

        if !tokio::fs::metadata(&path).await?.is_dir() {
            return Err(std::io::Error::other(format!(
                "{} exists but is not a directory",
                path.display()
            )));
        }
    }

    Ok(())
}
