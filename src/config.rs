//! Layered YAML configuration: compiled-in defaults, overridden by the
//! project file `./agentforge.yaml`, overridden in turn by the user file
//! `~/.afe/config/build_config.yaml`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AfeError, Result};
use crate::paths::UserDirectories;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "localhost".to_string(), port: 8080 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalAgentConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAgentConfig {
    pub name: String,
    pub repo: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentsConfig {
    pub local: Vec<LocalAgentConfig>,
    pub remote: Vec<RemoteAgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub hot_reload: bool,
    pub max_retries: u32,
    pub backoff_sec: u64,
    pub health_check: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { hot_reload: true, max_retries: 5, backoff_sec: 5, health_check: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub parallel_builds: bool,
    pub timeout: u64,
    pub build_flags: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { parallel_builds: false, timeout: 120, build_flags: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size_mb: u64,
    pub retention_days: u64,
    pub auto_cleanup: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true, max_size_mb: 512, retention_days: 30, auto_cleanup: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AfeConfig {
    pub server: ServerConfig,
    pub models: Vec<ModelConfig>,
    pub agents: AgentsConfig,
    pub recovery: RecoveryConfig,
    pub build: BuildConfig,
    pub cache: CacheConfig,
}

impl AfeConfig {
    /// Load defaults, then layer the project file, then the user file.
    /// Missing files at either layer are not an error.
    pub fn load(dirs: &UserDirectories) -> Result<Self> {
        let mut config = AfeConfig::default();

        config = layer_in(config, Path::new("./agentforge.yaml"))?;
        config = layer_in(config, &dirs.user_config_file())?;

        config.validate()?;
        Ok(config)
    }

    /// Load with an injectable callback, invoked once synchronously if the
    /// project config file can be observed to differ from a previous
    /// snapshot. This is the "watch callback" of §4.8: a polling hook the
    /// `reload` CLI path can drive, not a background filesystem watcher.
    pub fn load_with_watch<F>(dirs: &UserDirectories, previous_hash: Option<&str>, mut on_change: F) -> Result<Self>
    where
        F: FnMut(&str),
    {
        let project_path = Path::new("./agentforge.yaml");
        if let Ok(contents) = std::fs::read_to_string(project_path) {
            let hash = format!("{:x}", content_fingerprint(&contents));
            if previous_hash != Some(hash.as_str()) {
                on_change(&hash);
            }
        }
        Self::load(dirs)
    }

    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(AfeError::config("server.port must be non-zero"));
        }
        for agent in &self.agents.local {
            if agent.path.trim().is_empty() {
                return Err(AfeError::config(format!("agents.local[{}].path must not be empty", agent.name)));
            }
        }
        for agent in &self.agents.remote {
            if agent.repo.trim().is_empty() {
                return Err(AfeError::config(format!("agents.remote[{}].repo must not be empty", agent.name)));
            }
        }
        if self.recovery.backoff_sec == 0 {
            return Err(AfeError::config("recovery.backoff_sec must be at least 1"));
        }
        Ok(())
    }
}

fn layer_in(base: AfeConfig, path: &Path) -> Result<AfeConfig> {
    if !path.is_file() {
        debug!("config layer {} not present, skipping", path.display());
        return Ok(base);
    }

    let contents = std::fs::read_to_string(path)?;
    let overlay: PartialAfeConfig = serde_yaml::from_str(&contents).map_err(|e| {
        warn!("failed to parse config layer {}: {}", path.display(), e);
        AfeError::Yaml(e)
    })?;

    Ok(overlay.apply_over(base))
}

/// Mirrors `AfeConfig` but every field is optional, so a layer only
/// overrides what it actually sets.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialAfeConfig {
    server: Option<PartialServerConfig>,
    models: Option<Vec<ModelConfig>>,
    agents: Option<AgentsConfig>,
    recovery: Option<PartialRecoveryConfig>,
    build: Option<PartialBuildConfig>,
    cache: Option<PartialCacheConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialServerConfig {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialRecoveryConfig {
    hot_reload: Option<bool>,
    max_retries: Option<u32>,
    backoff_sec: Option<u64>,
    health_check: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialBuildConfig {
    parallel_builds: Option<bool>,
    timeout: Option<u64>,
    build_flags: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialCacheConfig {
    enabled: Option<bool>,
    max_size_mb: Option<u64>,
    retention_days: Option<u64>,
    auto_cleanup: Option<bool>,
}

impl PartialAfeConfig {
    fn apply_over(self, mut base: AfeConfig) -> AfeConfig {
        if let Some(server) = self.server {
            if let Some(host) = server.host {
                base.server.host = host;
            }
            if let Some(port) = server.port {
                base.server.port = port;
            }
        }
        if let Some(models) = self.models {
            base.models = models;
        }
        if let Some(agents) = self.agents {
            base.agents = agents;
        }
        if let Some(recovery) = self.recovery {
            if let Some(v) = recovery.hot_reload {
                base.recovery.hot_reload = v;
            }
            if let Some(v) = recovery.max_retries {
                base.recovery.max_retries = v;
            }
            if let Some(v) = recovery.backoff_sec {
                base.recovery.backoff_sec = v;
            }
            if let Some(v) = recovery.health_check {
                base.recovery.health_check = v;
            }
        }
        if let Some(build) = self.build {
            if let Some(v) = build.parallel_builds {
                base.build.parallel_builds = v;
            }
            if let Some(v) = build.timeout {
                base.build.timeout = v;
            }
            if let Some(v) = build.build_flags {
                base.build.build_flags = v;
            }
        }
        if let Some(cache) = self.cache {
            if let Some(v) = cache.enabled {
                base.cache.enabled = v;
            }
            if let Some(v) = cache.max_size_mb {
                base.cache.max_size_mb = v;
            }
            if let Some(v) = cache.retention_days {
                base.cache.retention_days = v;
            }
            if let Some(v) = cache.auto_cleanup {
                base.cache.auto_cleanup = v;
            }
        }
        base
    }
}

/// Cheap, dependency-free content fingerprint used only to detect "did the
/// project config file change" for the watch callback; not a cache hash.
fn content_fingerprint(contents: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    contents.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = AfeConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = AfeConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn project_layer_overrides_defaults() {
        let base = AfeConfig::default();
        let overlay = PartialAfeConfig {
            server: Some(PartialServerConfig { host: None, port: Some(9090) }),
            ..Default::default()
        };
        let merged = overlay.apply_over(base);
        assert_eq!(merged.server.port, 9090);
        assert_eq!(merged.server.host, "localhost");
    }
}
