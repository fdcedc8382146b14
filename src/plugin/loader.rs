//! Load and unload steps: open a built artifact, look up its entry point,
//! and bind it into the registry under a name.

use std::path::Path;
use std::sync::Arc;

use libloading::{Library, Symbol};
use tracing::warn;

use crate::error::{AfeError, Result};
use crate::plugin::registry::PluginRegistry;
use crate::plugin::{Agent, Provider};

/// Constructor exported by an agent plugin's `cdylib`. Preferred over
/// `provider_entry` when both happen to be present.
type AgentEntryFn = unsafe extern "Rust" fn() -> Box<dyn Agent>;
/// Constructor exported by a provider plugin's `cdylib`.
type ProviderEntryFn = unsafe extern "Rust" fn() -> Box<dyn Provider>;

/// Keeps a loaded `Library` alive for as long as the plugin built from it
/// is registered; dropping it would invalidate the plugin's vtable.
pub struct PluginLoader {
    libraries: dashmap::DashMap<String, Library>,
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginLoader {
    pub fn new() -> Self {
        Self { libraries: dashmap::DashMap::new() }
    }

    /// Open `artifact_path`, look up `Agent` then `Provider`, and insert
    /// the resulting handle into `registry` under `name`.
    pub fn load(&self, registry: &PluginRegistry, kind: &str, name: &str, artifact_path: &Path) -> Result<()> {
        let library = unsafe { Library::new(artifact_path) }.map_err(AfeError::Library)?;

        let agent_symbol: std::result::Result<Symbol<AgentEntryFn>, _> = unsafe { library.get(b"agent_entry") };
        let provider_symbol: std::result::Result<Symbol<ProviderEntryFn>, _> = unsafe { library.get(b"provider_entry") };

        match (kind, agent_symbol, provider_symbol) {
            ("agent", Ok(ctor), _) => {
                let agent: Arc<dyn Agent> = Arc::from(unsafe { ctor() });
                registry.insert_agent(name.to_string(), agent)?;
            }
            ("provider", _, Ok(ctor)) => {
                let provider: Arc<dyn Provider> = Arc::from(unsafe { ctor() });
                registry.insert_provider(name.to_string(), provider)?;
            }
            _ => {
                return Err(AfeError::LoadShape(name.to_string()));
            }
        }

        self.libraries.insert(registry_key(kind, name), library);
        Ok(())
    }

    /// Remove the entry from the registry and call its `Shutdown()`,
    /// tolerating (logging) any error it returns. The artifact file itself
    /// is not deleted; a later `load` may re-open it.
    pub async fn unload(&self, registry: &PluginRegistry, kind: &str, name: &str) -> Result<()> {
        match kind {
            "agent" => {
                if let Some(agent) = registry.remove_agent(name) {
                    if let Err(e) = agent.shutdown().await {
                        warn!("agent {name} returned an error during shutdown: {e}");
                    }
                }
            }
            "provider" => {
                if let Some(provider) = registry.remove_provider(name) {
                    if let Err(e) = provider.shutdown().await {
                        warn!("provider {name} returned an error during shutdown: {e}");
                    }
                }
            }
            other => return Err(AfeError::config(format!("unknown plugin kind: {other}"))),
        }

        self.libraries.remove(&registry_key(kind, name));
        Ok(())
    }
}

fn registry_key(kind: &str, name: &str) -> String {
    format!("{kind}/{name}")
}
