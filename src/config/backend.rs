//! Worker backend configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How worker processes are launched
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Agentic CLI to execute
    #[serde(default = "default_command")]
    pub command: String,

    /// Arguments placed before the instruction
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Timeout in seconds for a single worker call
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Flag used to pass the model name (empty to disable)
    #[serde(default = "default_model_flag")]
    pub model_flag: String,

    /// Flag used to pass the role system prompt (empty to disable)
    #[serde(default = "default_system_prompt_flag")]
    pub system_prompt_flag: String,

    /// Additional environment variables for the command
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_command() -> String {
    "claude".into()
}

fn default_args() -> Vec<String> {
    vec![
        "-p".into(),
        "--output-format".into(),
        "stream-json".into(),
        "--verbose".into(),
        "--permission-mode".into(),
        "acceptEdits".into(),
    ]
}

fn default_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_model_flag() -> String {
    "--model".into()
}

fn default_system_prompt_flag() -> String {
    "--append-system-prompt".into()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            timeout: default_timeout(),
            model_flag: default_model_flag(),
            system_prompt_flag: default_system_prompt_flag(),
            env: HashMap::new(),
        }
    }
}

impl BackendConfig {
    /// Backend running an arbitrary command with no extra flags
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            model_flag: String::new(),
            system_prompt_flag: String::new(),
            ..Default::default()
        }
    }

    /// Merge another backend config into this one (non-default fields win)
    pub fn merge(&mut self, other: Self) {
        let defaults = Self::default();
        if other.command != defaults.command {
            self.command = other.command;
        }
        if other.args != defaults.args {
            self.args = other.args;
        }
        if other.timeout != defaults.timeout {
            self.timeout = other.timeout;
        }
        if other.model_flag != defaults.model_flag {
            self.model_flag = other.model_flag;
        }
        if other.system_prompt_flag != defaults.system_prompt_flag {
            self.system_prompt_flag = other.system_prompt_flag;
        }
        self.env.extend(other.env);
    }
}
