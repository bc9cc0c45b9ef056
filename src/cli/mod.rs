//! CLI module for llmpress
//!
//! This module provides:
//! - Command implementations (run, artifacts, doctor, config)
//! - Output handlers (console, JSON, quiet)
//! - Signal handling for graceful shutdown
//!
//! # Example
//!
//! ```ignore
//! use llm_press::cli::{commands, output};
//!
//! let handler = output::create_handler(output::OutputMode::Console, false);
//! let exit_code = commands::run_workflow(options, dir, &config, &*handler).await?;
//! ```

pub mod commands;
pub mod output;
pub mod signals;

pub use commands::{RunOptions, doctor, run_workflow, show_artifacts, show_config};
pub use output::{OutputMode, create_handler};
