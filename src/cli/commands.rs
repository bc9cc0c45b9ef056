//! CLI command implementations

use super::output::{OutputEvent, OutputHandler};
use super::signals::{
    CancellationToken, INTERRUPTED_EXIT_CODE, setup_signal_handlers, with_cancellation,
};
use crate::agent::{CliAgent, LocalPool};
use crate::config::PressConfig;
use crate::workflow::{
    OrchestratorOptions, STAGES, WorkflowOrchestrator, WorkflowStatus, read_artifacts,
    validate_workflow_id,
};
use anyhow::{Context, Result};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Options for `run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub topic: String,
    pub requirements: String,
    pub workflow_id: Option<String>,
    pub keep_agents: bool,
}

/// Run one workflow to completion, streaming its timeline
pub async fn run_workflow(
    options: RunOptions,
    working_dir: &Path,
    config: &PressConfig,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let workspace_root = resolve_workspace(config, working_dir)?;
    let pool = Arc::new(LocalPool::with_cli_backend(
        config.defaults.max_agents,
        config.backend.clone(),
    ));
    let orchestrator = WorkflowOrchestrator::new(
        pool.clone(),
        &workspace_root,
        OrchestratorOptions {
            provision_timeout: config.provision_timeout(),
            stage_timeout: config.stage_timeout(),
        },
    );

    let workflow_id = options.workflow_id.unwrap_or_else(generate_workflow_id);
    let model = config.model_config(|name| std::env::var(name).ok());
    if model.api_key.is_none() {
        tracing::debug!(provider = %model.provider, "no API key in environment, relying on backend login");
    }

    handler.emit(OutputEvent::WorkflowStart {
        workflow_id: workflow_id.clone(),
        topic: options.topic.clone(),
        work_dir: workspace_root.join(&workflow_id),
    });

    let started = Instant::now();
    if let Err(e) = orchestrator
        .start_workflow(&workflow_id, &options.topic, &options.requirements, &model)
        .await
    {
        handler.emit(OutputEvent::WorkflowError {
            error: e.to_string(),
        });
        return Ok(1);
    }
    tracing::debug!(
        workflow = %workflow_id,
        live = pool.len(),
        capacity = pool.capacity(),
        "workers provisioned"
    );

    let token = CancellationToken::new();
    let signals = tokio::spawn(setup_signal_handlers(token.clone()));
    let watched = with_cancellation(
        token,
        watch_workflow(&orchestrator, &workflow_id, config, handler),
    )
    .await;
    signals.abort();

    let Some(status) = watched else {
        handler.emit(OutputEvent::Info {
            message: format!("Interrupted, releasing agents of '{}'", workflow_id),
        });
        for id in orchestrator.list_workflows() {
            release_agents(&orchestrator, &pool, &id, false, handler).await;
        }
        pool.shutdown().await;
        return Ok(INTERRUPTED_EXIT_CODE);
    };
    let status = status?;

    let success = status.error.is_none() && status.progress == 100;
    let artifacts = orchestrator.get_artifacts(&workflow_id).await?;
    let work_dir = workspace_root.join(&workflow_id);
    let paths = STAGES
        .iter()
        .filter(|spec| artifacts.contains_key(spec.key))
        .map(|spec| work_dir.join(spec.artifact()))
        .collect();

    if let Some(ref error) = status.error {
        handler.emit(OutputEvent::WorkflowError {
            error: error.clone(),
        });
    }
    handler.emit(OutputEvent::WorkflowComplete {
        workflow_id: workflow_id.clone(),
        success,
        duration_ms: started.elapsed().as_millis() as u64,
        artifacts: paths,
    });

    let final_document = artifacts.get("final").filter(|_| success);
    handler.result(success, final_document.map(String::as_str));

    release_agents(
        &orchestrator,
        &pool,
        &workflow_id,
        options.keep_agents,
        handler,
    )
    .await;
    if !options.keep_agents {
        pool.shutdown().await;
    }

    Ok(if success { 0 } else { 1 })
}

/// Poll until the workflow is terminal, emitting each new timeline entry once
async fn watch_workflow(
    orchestrator: &WorkflowOrchestrator,
    workflow_id: &str,
    config: &PressConfig,
    handler: &dyn OutputHandler,
) -> Result<WorkflowStatus> {
    let mut interval = tokio::time::interval(config.poll_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut seen = 0;

    loop {
        interval.tick().await;

        let status = orchestrator
            .get_workflow_status(workflow_id)
            .with_context(|| format!("polling workflow {}", workflow_id))?;

        seen = emit_new_events(&status, seen, handler);

        if status.is_terminal() {
            return Ok(status);
        }
    }
}

/// Emit events past `seen`; returns the new high-water mark
fn emit_new_events(status: &WorkflowStatus, seen: usize, handler: &dyn OutputHandler) -> usize {
    for event in status.events.iter().skip(seen) {
        handler.emit(OutputEvent::Timeline {
            progress: status.progress,
            event: event.clone(),
        });
    }
    status.events.len().max(seen)
}

async fn release_agents(
    orchestrator: &WorkflowOrchestrator,
    pool: &LocalPool,
    workflow_id: &str,
    keep: bool,
    handler: &dyn OutputHandler,
) {
    if keep {
        let kept = pool.list(&format!("{}-", workflow_id));
        handler.emit(OutputEvent::Debug {
            message: format!("keeping agents: {}", kept.join(", ")),
        });
        return;
    }

    if let Err(e) = orchestrator.remove_workflow_agents(workflow_id).await {
        tracing::warn!(workflow = %workflow_id, error = %e, "failed to remove agents");
    }
}

/// Print the artifacts of an existing workflow directory
pub async fn show_artifacts(
    workflow_id: &str,
    working_dir: &Path,
    config: &PressConfig,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    validate_workflow_id(workflow_id)?;

    let work_dir = resolve_workspace(config, working_dir)?.join(workflow_id);
    if !work_dir.is_dir() {
        handler.emit(OutputEvent::WorkflowError {
            error: format!("no workspace for '{}' at {}", workflow_id, work_dir.display()),
        });
        return Ok(1);
    }

    let artifacts = read_artifacts(&work_dir).await;
    if artifacts.is_empty() {
        handler.emit(OutputEvent::Info {
            message: format!("(no artifacts yet in {})", work_dir.display()),
        });
        return Ok(1);
    }

    handler.emit(OutputEvent::Artifacts {
        workflow_id: workflow_id.to_string(),
        artifacts,
    });
    Ok(0)
}

/// Check the backend command and the workspace
pub async fn doctor(config: &PressConfig, working_dir: &Path, handler: &dyn OutputHandler) -> i32 {
    let mut all_ok = true;

    handler.emit(OutputEvent::Info {
        message: "Checking backend...".into(),
    });
    let command = &config.backend.command;
    let message = if CliAgent::is_available(command).await {
        format!("✓ {} (cli)", command)
    } else {
        all_ok = false;
        format!("✗ {} (cli - not found)", command)
    };
    handler.emit(OutputEvent::Info { message });

    let model = config.model_config(|name| std::env::var(name).ok());
    handler.emit(OutputEvent::Info {
        message: format!(
            "  model: {} / {}{}",
            model.provider,
            model.model,
            if model.api_key.is_some() {
                " (API key set)"
            } else {
                ""
            }
        ),
    });

    handler.emit(OutputEvent::Info {
        message: "\nChecking workspace...".into(),
    });
    let message = match resolve_workspace(config, working_dir) {
        Ok(root) => match check_writable(&root).await {
            Ok(()) => format!("✓ {} is writable", root.display()),
            Err(e) => {
                all_ok = false;
                format!("✗ {}: {}", root.display(), e)
            }
        },
        Err(e) => {
            all_ok = false;
            format!("✗ {}", e)
        }
    };
    handler.emit(OutputEvent::Info { message });

    if all_ok { 0 } else { 1 }
}

async fn check_writable(root: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(root).await?;
    let probe = root.join(".llmpress-probe");
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await
}

/// Print the effective configuration as TOML
pub fn show_config(config: &PressConfig, handler: &dyn OutputHandler) -> Result<i32> {
    let rendered = toml::to_string_pretty(config).context("serializing configuration")?;
    handler.result(true, Some(rendered.trim_end()));
    Ok(0)
}

/// Workspace root, anchored at `working_dir` when relative
fn resolve_workspace(config: &PressConfig, working_dir: &Path) -> Result<PathBuf> {
    let root = config.workspace_root()?;
    Ok(if root.is_absolute() {
        root
    } else {
        working_dir.join(root)
    })
}

/// `<timestamp>-<6 hex digits>`
pub fn generate_workflow_id() -> String {
    let suffix: u32 = rand::rng().random_range(0..0x100_0000);
    format!(
        "{}-{:06x}",
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        suffix
    )
}
