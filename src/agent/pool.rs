//! In-process agent registry with a capacity limit

use super::cli_agent::CliAgent;
use super::types::{Agent, AgentConfig, AgentError, AgentPool};
use crate::config::BackendConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Default number of agents a pool may hold
pub const DEFAULT_MAX_AGENTS: usize = 50;

/// Builds an agent from its config
pub type AgentFactory =
    Arc<dyn Fn(AgentConfig) -> Result<Arc<dyn Agent>, AgentError> + Send + Sync>;

/// Pool of agents keyed by id
pub struct LocalPool {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
    capacity: usize,
    factory: AgentFactory,
}

impl LocalPool {
    pub fn new(capacity: usize, factory: AgentFactory) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            capacity,
            factory,
        }
    }

    /// Pool whose agents run the configured CLI backend
    pub fn with_cli_backend(capacity: usize, backend: BackendConfig) -> Self {
        let factory: AgentFactory = Arc::new(move |config| {
            let agent: Arc<dyn Agent> = Arc::new(CliAgent::new(config, &backend));
            Ok(agent)
        });
        Self::new(capacity, factory)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Agent ids, optionally filtered by prefix
    pub fn list(&self, prefix: &str) -> Vec<String> {
        let mut ids: Vec<_> = self
            .read()
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Close and drop every agent
    pub async fn shutdown(&self) {
        if self.is_empty() {
            return;
        }

        let drained: Vec<_> = {
            let mut agents = self.write();
            agents.drain().collect()
        };

        for (id, agent) in drained {
            if let Err(e) = agent.close().await {
                tracing::warn!(agent = %id, error = %e, "failed to close agent during shutdown");
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn Agent>>> {
        self.agents.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn Agent>>> {
        self.agents.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AgentPool for LocalPool {
    async fn create(&self, config: AgentConfig) -> Result<Arc<dyn Agent>, AgentError> {
        let mut agents = self.write();

        if agents.contains_key(&config.agent_id) {
            return Err(AgentError::AlreadyExists {
                id: config.agent_id,
            });
        }
        if agents.len() >= self.capacity {
            return Err(AgentError::PoolFull {
                capacity: self.capacity,
            });
        }

        let id = config.agent_id.clone();
        let agent = (self.factory)(config)?;
        agents.insert(id.clone(), agent.clone());

        tracing::debug!(agent = %id, size = agents.len(), "agent created");
        Ok(agent)
    }

    fn get(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.read().get(id).cloned()
    }

    async fn remove(&self, id: &str) -> Result<(), AgentError> {
        let removed = self.write().remove(id);

        if let Some(agent) = removed {
            agent.close().await?;
            tracing::debug!(agent = %id, "agent removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentState, ModelConfig};
    use std::path::PathBuf;

    fn config(id: &str) -> AgentConfig {
        AgentConfig {
            agent_id: id.into(),
            template_id: "writer".into(),
            model: ModelConfig::new("local", "test"),
            work_dir: PathBuf::from("."),
            system_prompt: None,
        }
    }

    fn echo_pool(capacity: usize) -> LocalPool {
        LocalPool::with_cli_backend(capacity, BackendConfig::command("echo"))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let pool = echo_pool(DEFAULT_MAX_AGENTS);
        let agent = pool.create(config("a")).await.unwrap();
        assert_eq!(agent.id(), "a");

        assert!(pool.get("a").is_some());
        assert!(pool.get("b").is_none());
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.status("a").unwrap().state, AgentState::Ready);
        assert!(matches!(pool.status("b"), Err(AgentError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let pool = echo_pool(DEFAULT_MAX_AGENTS);
        pool.create(config("a")).await.unwrap();

        let result = pool.create(config("a")).await;
        assert!(matches!(result, Err(AgentError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let pool = echo_pool(2);
        pool.create(config("a")).await.unwrap();
        pool.create(config("b")).await.unwrap();

        let result = pool.create(config("c")).await;
        assert!(matches!(result, Err(AgentError::PoolFull { capacity: 2 })));

        pool.remove("a").await.unwrap();
        assert!(pool.create(config("c")).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_closes_agent() {
        let pool = echo_pool(DEFAULT_MAX_AGENTS);
        let agent = pool.create(config("a")).await.unwrap();

        pool.remove("a").await.unwrap();
        assert!(pool.get("a").is_none());
        assert_eq!(agent.status().state, AgentState::Closed);

        // Unknown ids are ignored
        pool.remove("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_and_shutdown() {
        let pool = echo_pool(DEFAULT_MAX_AGENTS);
        pool.create(config("wf1-writer")).await.unwrap();
        pool.create(config("wf1-editor")).await.unwrap();
        pool.create(config("wf2-writer")).await.unwrap();

        assert_eq!(pool.list("wf1-"), vec!["wf1-editor", "wf1-writer"]);
        assert_eq!(pool.list("").len(), 3);

        pool.shutdown().await;
        assert!(pool.is_empty());
    }
}
