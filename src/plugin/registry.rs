//! Loaded plugin registry: two disjoint maps, typed O(1) lookup.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{AfeError, Result};
use crate::plugin::{Agent, Provider};

/// Registry of currently-loaded plugins. `providers` and `agents` are
/// disjoint by construction: a name may appear in at most one of the two
/// maps, enforced by `insert_agent`/`insert_provider` rejecting a collision.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    providers: Arc<DashMap<String, Arc<dyn Provider>>>,
    agents: Arc<DashMap<String, Arc<dyn Agent>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_agent(&self, name: String, agent: Arc<dyn Agent>) -> Result<()> {
        if self.providers.contains_key(&name) {
            return Err(AfeError::config(format!("name {name} is already registered as a provider")));
        }
        self.agents.insert(name, agent);
        Ok(())
    }

    pub fn insert_provider(&self, name: String, provider: Arc<dyn Provider>) -> Result<()> {
        if self.agents.contains_key(&name) {
            return Err(AfeError::config(format!("name {name} is already registered as an agent")));
        }
        self.providers.insert(name, provider);
        Ok(())
    }

    pub fn get_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).map(|entry| entry.clone())
    }

    pub fn get_provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).map(|entry| entry.clone())
    }

    pub fn remove_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.remove(name).map(|(_, v)| v)
    }

    pub fn remove_provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.remove(name).map(|(_, v)| v)
    }

    pub fn list_agents(&self) -> Vec<String> {
        self.agents.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn list_providers(&self) -> Vec<String> {
        self.providers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AfeError, Result};
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoopAgent(String);

    #[async_trait]
    impl Agent for NoopAgent {
        fn name(&self) -> &str {
            &self.0
        }
        async fn initialize(&self, _config: &Value) -> Result<()> {
            Ok(())
        }
        async fn process(&self, _input: crate::plugin::AgentInput) -> Result<crate::plugin::AgentOutput> {
            Ok(crate::plugin::AgentOutput::ok(Default::default()))
        }
        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    struct NoopProvider(String);

    #[async_trait]
    impl Provider for NoopProvider {
        fn name(&self) -> &str {
            &self.0
        }
        async fn initialize(&self, _config: &Value) -> Result<()> {
            Ok(())
        }
        async fn generate(&self, _req: crate::plugin::GenReq) -> Result<crate::plugin::GenResp> {
            Ok(crate::plugin::GenResp { text: String::new(), tokens: 0, finished: true, model: self.0.clone(), error: None })
        }
        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn name_appears_in_exactly_one_map() {
        let registry = PluginRegistry::new();
        registry.insert_agent("ls".to_string(), Arc::new(NoopAgent("ls".to_string()))).unwrap();

        assert!(registry.get_agent("ls").is_some());
        assert!(registry.get_provider("ls").is_none());
        assert_eq!(registry.list_agents(), vec!["ls".to_string()]);
    }

    #[test]
    fn unload_then_lookup_is_a_normal_miss() {
        let registry = PluginRegistry::new();
        registry.insert_agent("ls".to_string(), Arc::new(NoopAgent("ls".to_string()))).unwrap();
        registry.remove_agent("ls");
        assert!(registry.get_agent("ls").is_none());
    }

    #[test]
    fn colliding_name_across_maps_is_rejected_not_shadowed() {
        let registry = PluginRegistry::new();
        registry.insert_agent("dup".to_string(), Arc::new(NoopAgent("dup".to_string()))).unwrap();

        let err = registry.insert_provider("dup".to_string(), Arc::new(NoopProvider("dup".to_string()))).unwrap_err();
        assert!(matches!(err, AfeError::Configuration(_)));

        assert!(registry.get_agent("dup").is_some());
        assert!(registry.get_provider("dup").is_none());
    }

    #[test]
    fn collision_the_other_direction_is_also_rejected() {
        let registry = PluginRegistry::new();
        registry.insert_provider("dup".to_string(), Arc::new(NoopProvider("dup".to_string()))).unwrap();

        let err = registry.insert_agent("dup".to_string(), Arc::new(NoopAgent("dup".to_string()))).unwrap_err();
        assert!(matches!(err, AfeError::Configuration(_)));

        assert!(registry.get_provider("dup").is_some());
        assert!(registry.get_agent("dup").is_none());
    }
}
