mod agent;
mod cli;
mod config;
mod logging;
mod process;
mod workflow;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::{OutputMode, RunOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "llmpress")]
#[command(about = "Research, write and edit a document with a pipeline of LLM workers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Working directory (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Configuration file applied over the user and project files
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputMode::Console)]
    output: OutputMode,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a research/write/edit workflow
    Run {
        /// Topic of the document
        topic: String,

        /// Extra requirements (length, audience, tone)
        #[arg(long, short, default_value = "")]
        requirements: String,

        /// Workflow id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Keep the workers registered after the run
        #[arg(long)]
        keep_agents: bool,
    },

    /// Print the artifacts of an existing workflow
    Artifacts {
        /// Workflow id
        id: String,
    },

    /// Check backend availability and the workspace
    Doctor,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    let working_dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("reading current directory")?,
    };
    let config = config::PressConfig::load(Some(&working_dir), cli.config.as_deref())?;

    // Debug runs keep a per-workflow log file unless one was given
    let mut command = cli.command;
    if let Commands::Run { id, .. } = &mut command {
        let id = id.get_or_insert_with(cli::commands::generate_workflow_id);
        if cli.debug && cli.log_file.is_none() {
            cli.log_file = logging::default_log_path(id).ok();
        }
    }

    let mode = if cli.quiet {
        OutputMode::Quiet
    } else {
        cli.output
    };
    let guard = logging::init_logging(
        cli.debug,
        cli.quiet,
        mode == OutputMode::Json,
        cli.log_file.as_deref(),
    )?;
    let handler = cli::create_handler(mode, cli.debug);

    let code = match command {
        Commands::Run {
            topic,
            requirements,
            id,
            keep_agents,
        } => {
            let options = RunOptions {
                topic,
                requirements,
                workflow_id: id,
                keep_agents,
            };
            cli::run_workflow(options, &working_dir, &config, &*handler).await?
        }
        Commands::Artifacts { id } => {
            cli::show_artifacts(&id, &working_dir, &config, &*handler).await?
        }
        Commands::Doctor => cli::doctor(&config, &working_dir, &*handler).await,
        Commands::Config => cli::show_config(&config, &*handler)?,
    };

    if code != 0 {
        // process::exit skips destructors; flush the log file first
        drop(guard);
        std::process::exit(code);
    }

    Ok(())
}
