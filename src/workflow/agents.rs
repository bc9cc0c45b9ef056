//! Pool adapter that owns the three workers of each workflow

use super::deps::{Role, WorkflowDependencies};
use super::prompts::system_prompt;
use crate::agent::{Agent, AgentConfig, AgentError, AgentPool, AgentStatus, ModelConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Creates, looks up and removes the researcher/writer/editor of a workflow
pub struct WorkflowAgents {
    pool: Arc<dyn AgentPool>,
    workspace_root: PathBuf,
    workflows: Mutex<HashMap<String, WorkflowDependencies>>,
}

impl WorkflowAgents {
    pub fn new(pool: Arc<dyn AgentPool>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            workspace_root: workspace_root.into(),
            workflows: Mutex::new(HashMap::new()),
        }
    }

    /// Dependencies a workflow would get, without creating anything
    pub fn resolve(&self, workflow_id: &str) -> WorkflowDependencies {
        WorkflowDependencies::resolve(workflow_id, &self.workspace_root)
    }

    /// Create the three workers of a workflow
    ///
    /// Returns the existing dependencies if the workflow already has workers.
    /// When one creation fails the workers created before it are removed.
    pub async fn create_workflow_agents(
        &self,
        workflow_id: &str,
        model: &ModelConfig,
    ) -> Result<WorkflowDependencies, AgentError> {
        if let Some(deps) = self.workflow_deps(workflow_id) {
            tracing::debug!(workflow = %workflow_id, "workflow agents already exist");
            return Ok(deps);
        }

        let deps = self.resolve(workflow_id);
        let mut created: Vec<&str> = Vec::with_capacity(Role::ALL.len());

        for role in Role::ALL {
            let config = AgentConfig {
                agent_id: deps.agent_id(role).to_string(),
                template_id: role.template_id().to_string(),
                model: model.clone(),
                work_dir: deps.sandbox(role),
                system_prompt: Some(system_prompt(role).to_string()),
            };

            tracing::debug!(
                workflow = %workflow_id,
                agent = %config.agent_id,
                provider = %model.provider,
                model = %model.model,
                "creating agent"
            );

            if let Err(e) = self.pool.create(config).await {
                tracing::warn!(
                    workflow = %workflow_id,
                    role = %role,
                    error = %e,
                    "failed to create agent"
                );
                for id in created {
                    if let Err(e) = self.pool.remove(id).await {
                        tracing::warn!(agent = %id, error = %e, "rollback failed to remove agent");
                    }
                }
                return Err(e);
            }
            created.push(deps.agent_id(role));
        }

        self.lock().insert(workflow_id.to_string(), deps.clone());
        tracing::info!(
            workflow = %workflow_id,
            work_dir = %deps.work_dir.display(),
            "workflow agents created"
        );
        Ok(deps)
    }

    pub fn workflow_deps(&self, workflow_id: &str) -> Option<WorkflowDependencies> {
        self.lock().get(workflow_id).cloned()
    }

    pub fn get_agent(&self, agent_id: &str) -> Result<Arc<dyn Agent>, AgentError> {
        self.pool
            .get(agent_id)
            .ok_or_else(|| AgentError::not_found(agent_id))
    }

    pub fn get_agent_status(&self, agent_id: &str) -> Result<AgentStatus, AgentError> {
        self.pool.status(agent_id)
    }

    /// Remove a workflow's workers; unknown workflows are a no-op
    ///
    /// Workers of a half-provisioned workflow are found by their derived ids.
    /// Every worker is removed even if an earlier removal fails; the first
    /// error is returned.
    pub async fn remove_workflow_agents(&self, workflow_id: &str) -> Result<(), AgentError> {
        let removed = self.lock().remove(workflow_id);
        let deps = removed.unwrap_or_else(|| self.resolve(workflow_id));

        let mut first_error = None;
        for id in deps.agent_ids() {
            if let Err(e) = self.pool.remove(id).await {
                tracing::warn!(agent = %id, error = %e, "failed to remove agent");
                first_error.get_or_insert(e);
            }
        }

        tracing::debug!(workflow = %workflow_id, "workflow agents removed");
        first_error.map_or(Ok(()), Err)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, WorkflowDependencies>> {
        self.workflows.lock().unwrap_or_else(|e| e.into_inner())
    }
}
