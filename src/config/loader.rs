//! Configuration loading with multi-layer merge

use super::BackendConfig;
use crate::agent::{DEFAULT_MAX_AGENTS, ModelConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level llmpress configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PressConfig {
    /// Global defaults
    #[serde(default)]
    pub defaults: Defaults,

    /// Model shared by the three workers
    #[serde(default)]
    pub model: ModelSettings,

    /// How worker processes are launched
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Global default settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Directory holding one working directory per workflow
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,

    /// Seconds allowed for creating agents and directories
    #[serde(default = "default_provision_timeout")]
    pub provision_timeout: u64,

    /// Seconds allowed per stage; unset means stages never time out
    pub stage_timeout: Option<u64>,

    /// Maximum number of live agents
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    /// Status polling interval for `run`
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_workspace_root() -> String {
    "./workspace".into()
}

fn default_provision_timeout() -> u64 {
    30
}

fn default_max_agents() -> usize {
    DEFAULT_MAX_AGENTS
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            provision_timeout: default_provision_timeout(),
            stage_timeout: None,
            max_agents: default_max_agents(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

/// Model selection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSettings {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    pub base_url: Option<String>,

    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
}

fn default_provider() -> String {
    "anthropic".into()
}

fn default_model() -> String {
    "claude-3-haiku-20240307".into()
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: None,
        }
    }
}

impl ModelSettings {
    /// Key variable used when none is configured
    fn default_key_env(&self) -> &'static str {
        match self.provider.as_str() {
            "glm" | "zhipu" | "bigmodel" => "GLM_API_KEY",
            "deepseek" => "DEEPSEEK_API_KEY",
            "openai" => "OPENAI_API_KEY",
            _ => "ANTHROPIC_API_KEY",
        }
    }
}

impl PressConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/llmpress/config.toml
    /// 3. .llmpress/config.toml (project)
    /// 4. An explicit `--config` file
    /// 5. PROVIDER / MODEL / BASE_URL environment variables
    pub fn load(project_dir: Option<&Path>, explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        // Load user config
        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        // Load project config
        let project_config_path = project_dir
            .map(|p| p.join(".llmpress/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".llmpress/config.toml"));

        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        if let Some(path) = explicit {
            let explicit_config =
                Self::load_file(path).with_context(|| format!("loading {}", path.display()))?;
            config.merge(explicit_config);
        }

        config.apply_env(|name| std::env::var(name).ok());

        if let Err(errors) = config.validate() {
            anyhow::bail!("invalid configuration:\n  {}", errors.join("\n  "));
        }
        Ok(config)
    }

    /// Check values that would make every run fail straight away
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.defaults.provision_timeout == 0 {
            errors.push("defaults.provision_timeout must be at least 1 second".to_string());
        }
        if self.defaults.stage_timeout == Some(0) {
            errors.push(
                "defaults.stage_timeout must be at least 1 second (omit it to disable)".to_string(),
            );
        }
        if self.defaults.max_agents < 3 {
            errors.push("defaults.max_agents must allow the three workers of a workflow".to_string());
        }
        if self.backend.timeout == 0 {
            errors.push("backend.timeout must be at least 1 second".to_string());
        }
        if self.backend.command.trim().is_empty() {
            errors.push("backend.command must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Get the user config path (~/.config/llmpress/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("llmpress/config.toml"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        let defaults = Defaults::default();
        if other.defaults.workspace_root != defaults.workspace_root {
            self.defaults.workspace_root = other.defaults.workspace_root;
        }
        if other.defaults.provision_timeout != defaults.provision_timeout {
            self.defaults.provision_timeout = other.defaults.provision_timeout;
        }
        if other.defaults.stage_timeout.is_some() {
            self.defaults.stage_timeout = other.defaults.stage_timeout;
        }
        if other.defaults.max_agents != defaults.max_agents {
            self.defaults.max_agents = other.defaults.max_agents;
        }
        if other.defaults.poll_interval_ms != defaults.poll_interval_ms {
            self.defaults.poll_interval_ms = other.defaults.poll_interval_ms;
        }

        let model_defaults = ModelSettings::default();
        if other.model.provider != model_defaults.provider {
            self.model.provider = other.model.provider;
        }
        if other.model.model != model_defaults.model {
            self.model.model = other.model.model;
        }
        if other.model.base_url.is_some() {
            self.model.base_url = other.model.base_url;
        }
        if other.model.api_key_env.is_some() {
            self.model.api_key_env = other.model.api_key_env;
        }

        self.backend.merge(other.backend);
    }

    /// Apply environment overrides through the given lookup
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(provider) = lookup("PROVIDER").filter(|v| !v.is_empty()) {
            self.model.provider = provider;
        }
        if let Some(model) = lookup("MODEL").filter(|v| !v.is_empty()) {
            self.model.model = model;
        }
        if let Some(base_url) = lookup("BASE_URL").filter(|v| !v.is_empty()) {
            self.model.base_url = Some(base_url);
        }
    }

    /// Workspace root with `~` and environment variables expanded
    pub fn workspace_root(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.defaults.workspace_root)
            .with_context(|| format!("expanding {}", self.defaults.workspace_root))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.defaults.provision_timeout)
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.defaults.stage_timeout.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.defaults.poll_interval_ms.max(10))
    }

    /// Resolve the model config, reading the API key from the environment
    pub fn model_config(&self, lookup: impl Fn(&str) -> Option<String>) -> ModelConfig {
        let key_env = self
            .model
            .api_key_env
            .as_deref()
            .unwrap_or_else(|| self.model.default_key_env());

        ModelConfig {
            provider: self.model.provider.clone(),
            model: self.model.model.clone(),
            base_url: self.model.base_url.clone(),
            api_key: lookup(key_env).filter(|k| !k.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PressConfig::default();
        assert_eq!(config.defaults.workspace_root, "./workspace");
        assert_eq!(config.provision_timeout(), Duration::from_secs(30));
        assert!(config.stage_timeout().is_none());
        assert_eq!(config.defaults.max_agents, 50);
        assert_eq!(config.model.provider, "anthropic");
        assert_eq!(config.backend.command, "claude");
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
            [defaults]
            workspace_root = "/tmp/press"
            stage_timeout = 600

            [model]
            provider = "deepseek"
            model = "deepseek-chat"

            [backend]
            command = "codex"
            args = ["exec"]
        "#
        )
        .unwrap();

        let config = PressConfig::load_file(&config_path).unwrap();
        assert_eq!(config.defaults.workspace_root, "/tmp/press");
        assert_eq!(config.stage_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.model.model, "deepseek-chat");
        assert_eq!(config.backend.command, "codex");
        assert_eq!(config.backend.args, vec!["exec"]);
    }

    #[test]
    fn test_reject_unknown_fields() {
        let result: Result<PressConfig, _> = toml::from_str("[defaults]\nbogus = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_merge() {
        let mut base = PressConfig::default();
        base.defaults.stage_timeout = Some(60);
        base.model.model = "base-model".into();

        let mut other = PressConfig::default();
        other.defaults.workspace_root = "/srv/press".into();
        other.model.provider = "glm".into();

        base.merge(other);

        assert_eq!(base.defaults.workspace_root, "/srv/press");
        assert_eq!(base.model.provider, "glm");
        // Defaults in the override don't clobber earlier layers
        assert_eq!(base.model.model, "base-model");
        assert_eq!(base.defaults.stage_timeout, Some(60));
    }

    #[test]
    fn test_env_overrides_and_api_key() {
        let env: HashMap<&str, &str> = [
            ("PROVIDER", "deepseek"),
            ("MODEL", "deepseek-chat"),
            ("BASE_URL", "https://api.deepseek.com"),
            ("DEEPSEEK_API_KEY", "sk-test"),
        ]
        .into_iter()
        .collect();
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());

        let mut config = PressConfig::default();
        config.apply_env(lookup);
        let model = config.model_config(lookup);

        assert_eq!(model.provider, "deepseek");
        assert_eq!(model.model, "deepseek-chat");
        assert_eq!(model.base_url.as_deref(), Some("https://api.deepseek.com"));
        assert_eq!(model.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_workspace_root_expansion() {
        let mut config = PressConfig::default();
        config.defaults.workspace_root = "/var/press".into();
        assert_eq!(config.workspace_root().unwrap(), PathBuf::from("/var/press"));
    }

    #[test]
    fn test_load_project_and_explicit_layers() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".llmpress")).unwrap();
        std::fs::write(
            dir.path().join(".llmpress/config.toml"),
            "[defaults]\nmax_agents = 9\n",
        )
        .unwrap();

        let explicit = dir.path().join("extra.toml");
        std::fs::write(&explicit, "[defaults]\npoll_interval_ms = 250\n").unwrap();

        let config = PressConfig::load(Some(dir.path()), Some(&explicit)).unwrap();
        assert_eq!(config.defaults.max_agents, 9);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(PressConfig::default().validate().is_ok());

        let mut config = PressConfig::default();
        config.defaults.provision_timeout = 0;
        config.defaults.stage_timeout = Some(0);
        config.backend.timeout = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("provision_timeout"));
        assert!(errors[1].contains("stage_timeout"));
        assert!(errors[2].contains("backend.timeout"));
    }

    #[test]
    fn test_load_rejects_zero_stage_timeout() {
        let dir = TempDir::new().unwrap();
        let explicit = dir.path().join("bad.toml");
        std::fs::write(&explicit, "[defaults]\nstage_timeout = 0\n").unwrap();

        let err = PressConfig::load(Some(dir.path()), Some(&explicit)).unwrap_err();
        assert!(err.to_string().contains("stage_timeout"));
    }
}
