//! Workflow orchestrator
//!
//! Registers workflows, provisions their workers, and runs the three stages
//! as one detached task per workflow. Callers observe progress by polling.

use super::agents::WorkflowAgents;
use super::deps::{WorkflowDependencies, ensure_workspace_dirs, validate_workflow_id};
use super::error::OrchestratorError;
use super::prompts::PromptRenderer;
use super::stages::{STAGES, StageContext, execute_stage, read_artifacts};
use super::state::{WorkflowStatus, WorkflowTable};
use crate::agent::{AgentPool, ModelConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;

/// Tunables for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Bound on creating workers and directories
    pub provision_timeout: Duration,

    /// Bound on each worker call; `None` lets a call run forever
    pub stage_timeout: Option<Duration>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            provision_timeout: Duration::from_secs(30),
            stage_timeout: None,
        }
    }
}

struct Inner {
    table: WorkflowTable,
    agents: WorkflowAgents,
    prompts: PromptRenderer,
    options: OrchestratorOptions,
}

/// Entry point for starting and observing workflows
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    inner: Arc<Inner>,
}

impl WorkflowOrchestrator {
    pub fn new(
        pool: Arc<dyn AgentPool>,
        workspace_root: impl Into<PathBuf>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: WorkflowTable::new(),
                agents: WorkflowAgents::new(pool, workspace_root),
                prompts: PromptRenderer::new(),
                options,
            }),
        }
    }

    /// Register a workflow, provision it, and launch its pipeline
    ///
    /// Returns once the pipeline is running. A provisioning failure marks the
    /// workflow failed and is returned here; later failures are only visible
    /// through [`get_workflow_status`](Self::get_workflow_status).
    pub async fn start_workflow(
        &self,
        workflow_id: &str,
        topic: &str,
        requirements: &str,
        model: &ModelConfig,
    ) -> Result<(), OrchestratorError> {
        validate_workflow_id(workflow_id)?;
        self.inner.table.register(workflow_id)?;

        tracing::info!(workflow = %workflow_id, topic = %topic, "workflow registered");

        let after = self.inner.options.provision_timeout;
        let provisioned =
            match tokio::time::timeout(after, self.provision(workflow_id, model)).await {
                Ok(result) => result,
                Err(_) => Err(OrchestratorError::ProvisionTimeout {
                    workflow: workflow_id.to_string(),
                    after,
                }),
            };

        let deps = match provisioned {
            Ok(deps) => deps,
            Err(e) => {
                tracing::error!(workflow = %workflow_id, error = %e, "provisioning failed");
                self.inner
                    .table
                    .update(workflow_id, |status| status.fail(e.to_string()));
                if let Err(cleanup) = self.inner.agents.remove_workflow_agents(workflow_id).await {
                    tracing::warn!(
                        workflow = %workflow_id,
                        error = %cleanup,
                        "cleanup after failed provisioning"
                    );
                }
                return Err(e);
            }
        };

        self.inner.table.set_deps(workflow_id, deps.clone());
        self.launch(
            workflow_id.to_string(),
            topic.to_string(),
            requirements.to_string(),
            deps,
        );
        Ok(())
    }

    async fn provision(
        &self,
        workflow_id: &str,
        model: &ModelConfig,
    ) -> Result<WorkflowDependencies, OrchestratorError> {
        let deps = self.inner.agents.resolve(workflow_id);

        ensure_workspace_dirs(&deps.work_dir)
            .await
            .map_err(|e| OrchestratorError::Provisioning {
                workflow: workflow_id.to_string(),
                message: e.to_string(),
            })?;

        self.inner
            .agents
            .create_workflow_agents(workflow_id, model)
            .await
            .map_err(|e| OrchestratorError::Provisioning {
                workflow: workflow_id.to_string(),
                message: e.to_string(),
            })
    }

    /// Spawn the pipeline plus a supervisor that turns a panic into a failure
    fn launch(
        &self,
        workflow_id: String,
        topic: String,
        requirements: String,
        deps: WorkflowDependencies,
    ) {
        let inner = self.inner.clone();
        let id = workflow_id.clone();
        let pipeline = tokio::spawn(async move {
            run_pipeline(&inner, &id, &topic, &requirements, &deps).await;
        });

        let table = self.inner.table.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.await {
                let message = format!("pipeline stage failed: {}", describe_join_error(e));
                tracing::error!(workflow = %workflow_id, error = %message, "pipeline aborted");
                table.update(&workflow_id, |status| status.fail(message));
            }
        });
    }

    /// Live snapshot of a workflow, with worker statuses refreshed
    pub fn get_workflow_status(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowStatus, OrchestratorError> {
        if !self.inner.table.contains(workflow_id) {
            return Err(OrchestratorError::NotFound(workflow_id.to_string()));
        }

        // Queried before taking the table lock
        let workers = self.inner.table.deps(workflow_id).map(|deps| {
            deps.agent_ids()
                .map(|id| self.inner.agents.get_agent_status(id).ok())
        });

        self.inner
            .table
            .update(workflow_id, |status| {
                if let Some([researcher, writer, editor]) = workers {
                    if researcher.is_some() {
                        status.researcher_status = researcher;
                    }
                    if writer.is_some() {
                        status.writer_status = writer;
                    }
                    if editor.is_some() {
                        status.editor_status = editor;
                    }
                }
                status.clone()
            })
            .ok_or_else(|| OrchestratorError::NotFound(workflow_id.to_string()))
    }

    /// Contents of the stage artifacts that exist so far, keyed
    /// `outline`/`draft`/`final`
    pub async fn get_artifacts(
        &self,
        workflow_id: &str,
    ) -> Result<BTreeMap<String, String>, OrchestratorError> {
        let deps = self
            .inner
            .table
            .deps(workflow_id)
            .ok_or_else(|| OrchestratorError::NotFound(workflow_id.to_string()))?;

        Ok(read_artifacts(&deps.work_dir).await)
    }

    /// Release a workflow's workers; the workflow record and files stay
    pub async fn remove_workflow_agents(
        &self,
        workflow_id: &str,
    ) -> Result<(), OrchestratorError> {
        self.inner.agents.remove_workflow_agents(workflow_id).await?;
        Ok(())
    }

    pub fn list_workflows(&self) -> Vec<String> {
        self.inner.table.ids()
    }
}

async fn run_pipeline(
    inner: &Inner,
    workflow_id: &str,
    topic: &str,
    requirements: &str,
    deps: &WorkflowDependencies,
) {
    let ctx = StageContext {
        workflow_id,
        topic,
        requirements,
        deps,
        agents: &inner.agents,
        table: &inner.table,
        prompts: &inner.prompts,
        stage_timeout: inner.options.stage_timeout,
    };

    for spec in &STAGES {
        if let Err(e) = execute_stage(&ctx, spec).await {
            tracing::error!(
                workflow = %workflow_id,
                stage = %spec.stage,
                role = %e.role(),
                cause = e.kind(),
                error = %e,
                "stage failed"
            );
            let message = format!("{} stage failed: {}", spec.stage, e);
            inner.table.update(workflow_id, |status| status.fail(message));
            return;
        }
    }

    inner.table.update(workflow_id, |status| status.complete());
    tracing::info!(workflow = %workflow_id, "workflow complete");
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }

    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("panic: {}", message)
}
